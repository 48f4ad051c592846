use crate::common::{client_frame, start_gated_server, start_server_ws_and_client_transport, Gate};
use async_io::Timer;
use async_ws_session::frame::{FrameHead, Opcode};
use async_ws_session::session::{OperationKind, WsError, WsState};
use async_ws_session::WsMessageType;
use futures::future::join;
use futures::executor::block_on;
use futures::prelude::*;
use smol_timeout::TimeoutExt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

mod common;

const FIVE_MS: Duration = Duration::from_millis(5);
const TEN_MS: Duration = Duration::from_millis(10);
const INTERVAL: Duration = Duration::from_millis(30);
const ONE_SECOND: Duration = Duration::from_secs(1);

#[test]
fn idle_keepalive_timing() {
    block_on(async {
        let (_server, mut client) = start_server_ws_and_client_transport(Some(INTERVAL)).await;
        let mut start = Instant::now();
        for _ in 0..5 {
            let mut head = [0u8; 2];
            client.read_exact(&mut head).await.unwrap();
            let head = FrameHead::parse(&head).unwrap();
            if head.opcode != Opcode::Ping {
                panic!("unexpected frame: {:?}", head.opcode)
            }
            assert_eq!(head.payload_len, 0);
            let elapsed = start.elapsed();
            if elapsed + FIVE_MS < INTERVAL {
                panic!("ping arrived early: {:?}", elapsed)
            }
            if elapsed > INTERVAL * 5 {
                panic!("ping arrived late: {:?}", elapsed)
            }
            start = Instant::now();
        }
    })
}

#[test]
fn traffic_defers_keepalive() {
    block_on(async {
        let (server, client) = start_server_ws_and_client_transport(Some(INTERVAL)).await;
        let token = CancellationToken::new();
        let traffic = async {
            for _ in 0..10 {
                (&client)
                    .write_all(&client_frame(Opcode::Binary, true, b"tick"))
                    .await
                    .unwrap();
                let mut buffer = [0u8; 8];
                let result = server.receive(&mut buffer, &token).await.unwrap();
                assert_eq!(&buffer[..result.count], b"tick");
                Timer::after(TEN_MS).await;
            }
            true
        };
        let ping = async {
            let mut head = [0u8; 2];
            (&client).read_exact(&mut head).await.unwrap();
            false
        };
        assert!(futures_lite::future::or(traffic, ping).await);
    })
}

#[test]
fn disabled_keepalive_stays_silent() {
    block_on(async {
        let (_server, mut client) = start_server_ws_and_client_transport(None).await;
        let mut head = [0u8; 2];
        let read = client.read_exact(&mut head).timeout(INTERVAL * 3).await;
        assert!(read.is_none());
    })
}

#[test]
fn keepalive_failure_is_latched() {
    block_on(async {
        let (server, client) = start_server_ws_and_client_transport(Some(FIVE_MS)).await;
        drop(client);
        Timer::after(INTERVAL * 10).await;
        let token = CancellationToken::new();
        let mut buffer = [0u8; 8];
        match server.receive(&mut buffer, &token).await {
            Err(WsError::Faulted(_)) => {}
            other => panic!("expected latched fault, got: {:?}", other),
        }
        assert_eq!(server.state(), WsState::Aborted);
        assert!(matches!(
            server.receive(&mut buffer, &token).await,
            Err(WsError::InvalidState { .. })
        ));
    })
}

#[test]
fn send_waits_for_keepalive_ping() {
    block_on(async {
        let gate = Gate::shut();
        let server = start_gated_server(&gate, Some(INTERVAL));
        // The first ping is now stuck in its write and holds the send slot.
        Timer::after(INTERVAL * 3).await;
        let token = CancellationToken::new();
        let (sent, _) = join(
            server.send(b"data", WsMessageType::Binary, true, &token),
            async {
                Timer::after(TEN_MS).await;
                gate.open();
            },
        )
        .timeout(ONE_SECOND)
        .await
        .unwrap();
        sent.unwrap();
        assert_eq!(gate.written(), vec![0x89, 0x00, 0x82, 0x04, b'd', b'a', b't', b'a']);
        assert_eq!(server.state(), WsState::Open);
    })
}

#[test]
fn send_waiting_for_ping_can_be_canceled() {
    block_on(async {
        let gate = Gate::shut();
        let server = start_gated_server(&gate, Some(INTERVAL));
        Timer::after(INTERVAL * 3).await;
        let token = CancellationToken::new();
        let (sent, _) = join(
            server.send(b"data", WsMessageType::Binary, true, &token),
            async {
                Timer::after(TEN_MS).await;
                token.cancel();
            },
        )
        .timeout(ONE_SECOND)
        .await
        .unwrap();
        assert!(matches!(sent, Err(WsError::Canceled)));
        assert_eq!(server.state(), WsState::Aborted);
    })
}

#[test]
fn second_send_fails_fast_while_ping_waits() {
    block_on(async {
        let gate = Gate::shut();
        let server = start_gated_server(&gate, Some(INTERVAL));
        let token = CancellationToken::new();
        let outcome = futures_lite::future::or(
            async { Some(server.send(b"first", WsMessageType::Binary, true, &token).await) },
            async {
                // By now a ping is queued behind the stalled first send.
                Timer::after(INTERVAL * 3).await;
                server
                    .send(b"second", WsMessageType::Binary, true, &token)
                    .timeout(INTERVAL * 10)
                    .await
            },
        )
        .await;
        match outcome {
            Some(Err(WsError::OperationInProgress(OperationKind::Send))) => {}
            other => panic!("expected the second send to be refused, got: {:?}", other),
        }
    })
}

#[test]
fn keepalive_fault_is_latched_before_abort() {
    block_on(async {
        let gate = Gate::shut();
        gate.break_writes();
        let server = start_gated_server(&gate, Some(FIVE_MS));
        async {
            while server.state() != WsState::Aborted {
                Timer::after(Duration::from_millis(1)).await;
            }
        }
        .timeout(ONE_SECOND)
        .await
        .unwrap();
        let token = CancellationToken::new();
        let mut buffer = [0u8; 8];
        match server.receive(&mut buffer, &token).await {
            Err(WsError::Faulted(err)) => assert!(matches!(*err, WsError::Io(_))),
            other => panic!("expected latched fault, got: {:?}", other),
        }
        assert!(matches!(
            server.receive(&mut buffer, &token).await,
            Err(WsError::InvalidState { .. })
        ));
    })
}
