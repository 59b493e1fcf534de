// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use laf_core::test_support::runner_hello;
use laf_core::StepId;

#[tokio::test]
async fn server_msg_roundtrips_over_a_duplex_pipe() {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);

    let msg = ServerMsg::CancelStep {
        step_id: StepId::new("s-1"),
    };
    write_server_msg(&mut server, &msg).await.unwrap();

    let bytes = read_message(&mut client).await.unwrap();
    let decoded: ServerMsg = decode(&bytes).unwrap();
    assert_eq!(decoded, msg);
}

#[tokio::test]
async fn runner_msg_roundtrips() {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);

    let msg = RunnerMsg::AckStep {
        step_id: StepId::new("s-1"),
    };
    let data = encode(&msg).unwrap();
    write_message(&mut client, &data).await.unwrap();

    let decoded = read_runner_msg(&mut server).await.unwrap();
    assert_eq!(decoded, msg);
}

#[tokio::test]
async fn hello_handshake_accepts_hello_first() {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);

    let hello = runner_hello("worker", "shell");
    let data = encode(&RunnerMsg::Hello(hello.clone())).unwrap();
    write_message(&mut client, &data).await.unwrap();

    let received = read_hello(&mut server).await.unwrap();
    assert_eq!(received, hello);
}

#[tokio::test]
async fn non_hello_first_frame_is_rejected() {
    let (mut client, mut server) = tokio::io::duplex(64 * 1024);

    let data = encode(&RunnerMsg::Pong { seq: 1 }).unwrap();
    write_message(&mut client, &data).await.unwrap();

    assert!(matches!(
        read_hello(&mut server).await,
        Err(ProtocolError::ExpectedHello)
    ));
}

#[tokio::test]
async fn closed_pipe_reads_as_connection_closed() {
    let (client, mut server) = tokio::io::duplex(1024);
    drop(client);

    assert!(matches!(
        read_message(&mut server).await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn oversize_length_prefix_is_rejected() {
    let (mut client, mut server) = tokio::io::duplex(1024);

    use tokio::io::AsyncWriteExt;
    let huge = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
    client.write_all(&huge).await.unwrap();

    assert!(matches!(
        read_message(&mut server).await,
        Err(ProtocolError::MessageTooLarge { .. })
    ));
}

#[test]
fn encode_rejects_oversize_payloads() {
    let big = "x".repeat(MAX_MESSAGE_SIZE + 1);
    let msg = RunnerMsg::StepLogs {
        step_id: StepId::new("s"),
        lines: vec![big],
    };
    assert!(matches!(
        encode(&msg),
        Err(ProtocolError::MessageTooLarge { .. })
    ));
}
