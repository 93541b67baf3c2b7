// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Async ISO-on-TCP / S7comm transport.
//!
//! This is the wire-level half of a PLC connection: it knows how to open the
//! ISO-on-TCP handshake, negotiate a PDU length, and frame `Data Block`
//! read/write job requests, but nothing about signal maps, caching, or
//! retries — those live one layer up in `session.rs`. The telegram layout
//! and framing constants are the S7comm protocol itself and are carried
//! over unchanged; only the I/O has been made async (`tokio::net::TcpStream`
//! + `AsyncReadExt`/`AsyncWriteExt` in place of blocking `std::net`).

use std::{fmt, io};

use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

/// Connection types used during ISO connection request negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ConnectionType {
    /// As a programming device (default).
    Pg = 0x0001,
    /// As an operator panel / HMI.
    Op = 0x0002,
    /// As a generic S7 Basic device.
    S7Basic = 0x0003,
}

const S7_AREA_DB: u8 = 0x84;
const S7_WL_BYTE: u8 = 0x02;

const TS_RES_BIT: u8 = 0x03;
const TS_RES_BYTE: u8 = 0x04;

const TPKT_ISO_LEN: usize = 7;
const PDU_LEN_REQ: u16 = 480;
const ISO_CR_LEN: usize = 22;
const ISO_CONN_OK: u8 = 0xD0;
const ISO_PN_REQ_LEN: usize = 25;
const ISO_PN_RES_LEN: usize = 27;
const ISO_ID: u8 = 0x03;
const S7_ID: u8 = 0x32;

const READ_REQ_LEN: usize = 31;
const READ_RES_LEN: usize = 18;
const WRITE_RES_LEN: usize = 15;

const EOT: u8 = 0x80;
const RW_RES_OFFSET: usize = 14;

const RES_SUCCESS: u8 = 0xFF;
const RES_INVALID_ADDRESS: u8 = 0x05;
const RES_NOT_FOUND: u8 = 0x0A;

macro_rules! hi_part {
    ($x:expr) => {
        (($x >> 8) & 0xFF) as u8
    };
}
macro_rules! lo_part {
    ($x:expr) => {
        ($x & 0xFF) as u8
    };
}
macro_rules! make_u16 {
    ($hi:expr, $lo:expr) => {
        ((($hi as u16) << 8) | ($lo as u16))
    };
}

/// Low-level wire faults, distinct from the higher `GatewayError` taxonomy
/// so the session layer can decide retry/reconnect policy from the cause.
#[derive(Debug, Error)]
pub enum S7WireError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("not connected")]
    NotConnected,
    #[error("TCP connection failed")]
    TcpConnectionFailed,
    #[error("ISO-on-TCP connection failed")]
    IsoConnectionFailed,
    #[error("fragmented ISO packet")]
    IsoFragmentedPacket,
    #[error("invalid ISO header")]
    IsoInvalidHeader,
    #[error("invalid ISO telegram")]
    IsoInvalidTelegram,
    #[error("S7 PDU negotiation failed")]
    PduNegotiationFailed,
    #[error("S7 resource not found in the CPU")]
    S7NotFound,
    #[error("S7 invalid address")]
    S7InvalidAddress,
    #[error("S7 unspecified error")]
    S7Unspecified,
}

/// A single ISO-on-TCP / S7comm connection, scoped to `Data Block` access
/// (the only area the gateway needs).
pub struct S7Transport {
    stream: TcpStream,
    max_rd_pdu_data: u16,
    max_wr_pdu_data: u16,
}

impl fmt::Debug for S7Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S7Transport")
            .field("max_rd_pdu_data", &self.max_rd_pdu_data)
            .field("max_wr_pdu_data", &self.max_wr_pdu_data)
            .finish()
    }
}

fn check_iso_packet(pdu_length: u16, iso_packet: &[u8; TPKT_ISO_LEN]) -> Result<usize, S7WireError> {
    if iso_packet[0] != ISO_ID || iso_packet[4] != 0x02 || iso_packet[5] != 0xF0 {
        return Err(S7WireError::IsoInvalidHeader);
    }
    if iso_packet[6] != EOT {
        return Err(S7WireError::IsoFragmentedPacket);
    }

    let telegram_length: usize = make_u16!(iso_packet[2], iso_packet[3]) as usize;

    if telegram_length < TPKT_ISO_LEN
        || telegram_length - TPKT_ISO_LEN > pdu_length as usize
        || telegram_length - TPKT_ISO_LEN == 0
    {
        return Err(S7WireError::IsoInvalidTelegram);
    }

    Ok(telegram_length - TPKT_ISO_LEN)
}

impl S7Transport {
    /// Opens the ISO-on-TCP handshake and negotiates a PDU length against
    /// `host:102`, connecting as `rack`/`slot` with the given connection
    /// type.
    pub async fn connect(
        host: &str,
        rack: u16,
        slot: u16,
        conn_type: ConnectionType,
    ) -> Result<Self, S7WireError> {
        let addr = format!("{host}:102");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|_| S7WireError::TcpConnectionFailed)?;
        stream.set_nodelay(true)?;

        let local_tsap: u16 = 0x0100;
        let remote_tsap: u16 = ((conn_type as u16) << 8) + (rack * 0x20) + slot;

        Self::from_stream(stream, local_tsap, remote_tsap).await
    }

    async fn from_stream(
        mut stream: TcpStream,
        local_tsap: u16,
        remote_tsap: u16,
    ) -> Result<Self, S7WireError> {
        let iso_cr: [u8; ISO_CR_LEN] = [
            ISO_ID,
            0x00,
            hi_part!(ISO_CR_LEN),
            lo_part!(ISO_CR_LEN),
            0x11,
            0xE0,
            0x00,
            0x00,
            0x00,
            0x01,
            0x00,
            0xC0,
            0x01,
            0x0A,
            0xC1,
            0x02,
            hi_part!(local_tsap),
            lo_part!(local_tsap),
            0xC2,
            0x02,
            hi_part!(remote_tsap),
            lo_part!(remote_tsap),
        ];
        stream.write_all(&iso_cr).await?;

        let mut iso_resp = [0u8; ISO_CR_LEN];
        let size_resp = stream.read(&mut iso_resp).await?;
        if size_resp < ISO_CR_LEN || iso_resp[5] != ISO_CONN_OK {
            return Err(S7WireError::IsoConnectionFailed);
        }

        let s7_pn: [u8; ISO_PN_REQ_LEN] = [
            ISO_ID,
            0x00,
            0x00,
            0x19,
            0x02,
            0xf0,
            0x80,
            S7_ID,
            0x01,
            0x00,
            0x00,
            0x04,
            0x00,
            0x00,
            0x08,
            0x00,
            0x00,
            0xf0,
            0x00,
            0x00,
            0x01,
            0x00,
            0x01,
            hi_part!(PDU_LEN_REQ),
            lo_part!(PDU_LEN_REQ),
        ];
        stream.write_all(&s7_pn).await?;

        let mut pn_resp = [0u8; ISO_PN_RES_LEN];
        let size_pn = stream.read(&mut pn_resp).await?;
        if size_pn < ISO_PN_RES_LEN || pn_resp[0] != ISO_ID || pn_resp[7] != S7_ID || pn_resp[17] != 0x00 {
            return Err(S7WireError::PduNegotiationFailed);
        }

        let pdu_length = make_u16!(pn_resp[25], pn_resp[26]);
        if pdu_length == 0 {
            return Err(S7WireError::PduNegotiationFailed);
        }

        debug!(pdu_length, "negotiated S7 PDU length");

        Ok(Self {
            stream,
            max_rd_pdu_data: pdu_length - 18,
            max_wr_pdu_data: pdu_length - 28,
        })
    }

    /// Reads `buffer.len()` bytes starting at `start` within `db_number`,
    /// splitting into PDU-sized chunks as needed.
    pub async fn read_db(
        &mut self,
        db_number: u16,
        start: u16,
        buffer: &mut [u8],
    ) -> Result<(), S7WireError> {
        let datasize: u16 = buffer.len().min(u16::MAX as usize) as u16;
        let mut offset = 0u16;
        let mut long_start: u32 = start as u32;

        while offset < datasize {
            let remaining = datasize - offset;
            let chunk_size = remaining.min(self.max_rd_pdu_data);

            let mut request: [u8; READ_REQ_LEN] = [
                ISO_ID, 0x00, 0x00, 0x1f, 0x02, 0xf0, 0x80, S7_ID, 0x01, 0x00, 0x00, 0x05, 0x00,
                0x00, 0x0e, 0x00, 0x00, 0x04, 0x01, 0x12, 0x0a, 0x10, S7_WL_BYTE,
                hi_part!(chunk_size), lo_part!(chunk_size), hi_part!(db_number),
                lo_part!(db_number), S7_AREA_DB, 0x00, 0x00, 0x00,
            ];

            let address = long_start << 3;
            request[28] = ((address >> 16) & 0xFF) as u8;
            request[29] = ((address >> 8) & 0xFF) as u8;
            request[30] = (address & 0xFF) as u8;

            self.stream.write_all(&request).await?;

            let mut iso_packet = [0u8; TPKT_ISO_LEN];
            self.stream.read_exact(&mut iso_packet).await?;
            let s7_comm_size = check_iso_packet(PDU_LEN_REQ, &iso_packet)?;
            if s7_comm_size < READ_RES_LEN {
                return Err(S7WireError::IsoInvalidTelegram);
            }

            let mut response = vec![0u8; s7_comm_size];
            self.stream.read_exact(&mut response).await?;

            if response[RW_RES_OFFSET] != RES_SUCCESS {
                return Err(match response[RW_RES_OFFSET] {
                    RES_NOT_FOUND => S7WireError::S7NotFound,
                    RES_INVALID_ADDRESS => S7WireError::S7InvalidAddress,
                    _ => S7WireError::S7Unspecified,
                });
            }

            let payload_len = (s7_comm_size - READ_RES_LEN).min(chunk_size as usize);
            let payload = &response[READ_RES_LEN..READ_RES_LEN + payload_len];
            buffer[offset as usize..offset as usize + payload.len()].copy_from_slice(payload);

            offset += chunk_size;
            long_start += chunk_size as u32;
        }

        Ok(())
    }

    /// Writes `buffer` starting at `start` within `db_number`.
    pub async fn write_db(
        &mut self,
        db_number: u16,
        start: u16,
        buffer: &[u8],
    ) -> Result<(), S7WireError> {
        let datasize = buffer.len().min(u16::MAX as usize);
        let mut offset = 0usize;
        let mut long_start: u32 = start as u32;

        while offset < datasize {
            let chunk_size = (datasize - offset).min(self.max_wr_pdu_data as usize);
            let chunk = &buffer[offset..offset + chunk_size];
            let bits_payload: u16 = (chunk_size << 3) as u16;

            let mut request = vec![
                ISO_ID, 0x00, 0x00, 0x00, 0x02, 0xf0, 0x80, S7_ID, 0x01, 0x00, 0x00, 0x05, 0x00,
                0x00, 0x0e, hi_part!(chunk_size + 4), lo_part!(chunk_size + 4), 0x05, 0x01, 0x12,
                0x0a, 0x10, S7_WL_BYTE, hi_part!(chunk_size), lo_part!(chunk_size),
                hi_part!(db_number), lo_part!(db_number), S7_AREA_DB, 0x00, 0x00, 0x00, 0x00,
                TS_RES_BYTE, hi_part!(bits_payload), lo_part!(bits_payload),
            ];
            request.extend_from_slice(chunk);

            let total_len = request.len();
            request[2] = hi_part!(total_len);
            request[3] = lo_part!(total_len);

            let address = long_start << 3;
            request[28] = ((address >> 16) & 0xFF) as u8;
            request[29] = ((address >> 8) & 0xFF) as u8;
            request[30] = (address & 0xFF) as u8;

            self.stream.write_all(&request).await?;

            let mut iso_packet = [0u8; TPKT_ISO_LEN];
            self.stream.read_exact(&mut iso_packet).await?;
            let s7_comm_size = check_iso_packet(PDU_LEN_REQ, &iso_packet)?;
            if s7_comm_size < WRITE_RES_LEN {
                return Err(S7WireError::IsoInvalidTelegram);
            }

            let mut response = vec![0u8; s7_comm_size];
            self.stream.read_exact(&mut response).await?;

            if response[RW_RES_OFFSET] != RES_SUCCESS {
                return Err(match response[RW_RES_OFFSET] {
                    RES_NOT_FOUND => S7WireError::S7NotFound,
                    RES_INVALID_ADDRESS => S7WireError::S7InvalidAddress,
                    _ => S7WireError::S7Unspecified,
                });
            }

            offset += chunk_size;
            long_start += chunk_size as u32;
        }

        Ok(())
    }

    /// Half-closes the socket. Safe to call multiple times.
    pub async fn disconnect(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
