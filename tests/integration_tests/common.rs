// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A minimal ISO-on-TCP/S7comm server good enough to exercise
//! `s7gateway::wire::S7Transport` end to end, grounded on the teacher's own
//! "connect to a real target over TCP" integration style
//! (`tests/integration_tests/common.rs::connect_cfg`) but with the target
//! faked in-process instead of requiring a live PLC or iSCSI appliance.
//!
//! Only as much of the protocol is implemented as `wire.rs` actually speaks:
//! the ISO connection-request handshake, PDU-length negotiation, and DB
//! read/write job telegrams. Byte offsets mirror `wire.rs`'s request layout
//! exactly; see its module docs for the telegram shapes.

use std::{collections::HashMap, sync::Arc};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

const ISO_ID: u8 = 0x03;
const S7_ID: u8 = 0x32;
const ISO_CONN_OK: u8 = 0xD0;

pub type PlcMemory = Arc<Mutex<HashMap<u16, Vec<u8>>>>;

/// A PLC has one ISO-on-TCP endpoint on port 102; tests that spawn one must
/// run `#[serial]` since the port can't be parameterized away (`wire.rs`
/// hardcodes it, matching the real S7comm convention).
pub struct FakePlc {
    pub read_calls: Arc<std::sync::atomic::AtomicU32>,
}

impl FakePlc {
    pub async fn spawn(memory: PlcMemory) -> Self {
        let listener = TcpListener::bind("127.0.0.1:102")
            .await
            .expect("bind 127.0.0.1:102 (run as a user that can bind low ports, and #[serial])");
        let read_calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = read_calls.clone();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handle_connection(socket, memory.clone(), counter.clone()));
            }
        });

        Self { read_calls }
    }
}

async fn handle_connection(mut socket: TcpStream, memory: PlcMemory, read_calls: Arc<std::sync::atomic::AtomicU32>) {
    let mut iso_cr = [0u8; 22];
    if socket.read_exact(&mut iso_cr).await.is_err() {
        return;
    }
    let mut iso_resp = [0u8; 22];
    iso_resp[0] = ISO_ID;
    iso_resp[5] = ISO_CONN_OK;
    if socket.write_all(&iso_resp).await.is_err() {
        return;
    }

    let mut pn_req = [0u8; 25];
    if socket.read_exact(&mut pn_req).await.is_err() {
        return;
    }
    let pdu_length: u16 = 240;
    let mut pn_resp = [0u8; 27];
    pn_resp[0] = ISO_ID;
    pn_resp[7] = S7_ID;
    pn_resp[17] = 0x00;
    pn_resp[25] = (pdu_length >> 8) as u8;
    pn_resp[26] = (pdu_length & 0xff) as u8;
    if socket.write_all(&pn_resp).await.is_err() {
        return;
    }

    loop {
        let mut tpkt = [0u8; 7];
        if socket.read_exact(&mut tpkt).await.is_err() {
            return;
        }
        let telegram_length = ((tpkt[2] as usize) << 8) | (tpkt[3] as usize);
        let mut s7 = vec![0u8; telegram_length - 7];
        if socket.read_exact(&mut s7).await.is_err() {
            return;
        }

        let function = s7[10];
        let chunk_size = ((s7[16] as u16) << 8) | (s7[17] as u16);
        let db = ((s7[18] as u16) << 8) | (s7[19] as u16);
        let address = ((s7[21] as u32) << 16) | ((s7[22] as u32) << 8) | (s7[23] as u32);
        let start = (address >> 3) as usize;

        if function == 0x04 {
            read_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let payload = {
                let mut mem = memory.lock().await;
                let buf = mem.entry(db).or_insert_with(|| vec![0u8; 4096]);
                if buf.len() < start + chunk_size as usize {
                    buf.resize(start + chunk_size as usize, 0);
                }
                buf[start..start + chunk_size as usize].to_vec()
            };

            let mut resp_s7 = vec![0u8; 18 + payload.len()];
            resp_s7[14] = 0xFF;
            resp_s7[18..].copy_from_slice(&payload);
            send_telegram(&mut socket, &resp_s7).await;
        } else {
            let payload = &s7[28..28 + chunk_size as usize];
            {
                let mut mem = memory.lock().await;
                let buf = mem.entry(db).or_insert_with(|| vec![0u8; 4096]);
                if buf.len() < start + payload.len() {
                    buf.resize(start + payload.len(), 0);
                }
                buf[start..start + payload.len()].copy_from_slice(payload);
            }

            let mut resp_s7 = vec![0u8; 15];
            resp_s7[14] = 0xFF;
            send_telegram(&mut socket, &resp_s7).await;
        }
    }
}

async fn send_telegram(socket: &mut TcpStream, s7_part: &[u8]) {
    let telegram_length = s7_part.len() + 7;
    let header = [ISO_ID, 0x00, (telegram_length >> 8) as u8, (telegram_length & 0xff) as u8, 0x02, 0xf0, 0x80];
    if socket.write_all(&header).await.is_err() {
        return;
    }
    let _ = socket.write_all(s7_part).await;
}
