// Integration tests for the command channel against a simulated board

mod common;

use std::time::Duration;

use common::{BoardState, HEARTBEAT_INTERVAL, connect, connect_with, fast_settings};
use tbone_host::communication::{
    ChannelError, ChannelSettings, Command, CommandChannel, CommandNumber, ReplyKind,
};

#[tokio::test]
async fn test_handshake_reads_heartbeat() {
    let (channel, board) = connect(BoardState {
        queue_length: 2,
        queue_capacity: 64,
        ..BoardState::default()
    })
    .await;
    assert!(channel.is_connected());
    let heartbeat = channel.heartbeat();
    assert_eq!(heartbeat.status.queue_length, 2);
    assert_eq!(heartbeat.status.queue_capacity, 64);
    assert_eq!(heartbeat.status.free_ram(), 4000);
    assert!(board.snapshot().received.is_empty());
}

#[tokio::test]
async fn test_handshake_times_out_without_keep_alive() {
    let (host, _board) = tokio::io::duplex(64);
    let (reader, writer) = tokio::io::split(host);
    let settings = ChannelSettings {
        startup_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let result = CommandChannel::connect(reader, writer, settings).await;
    assert!(matches!(result, Err(ChannelError::Handshake(_))));
}

#[tokio::test]
async fn test_send_returns_matching_reply() {
    let (channel, board) = connect(BoardState::default()).await;
    let reply = channel
        .send(&Command::new(CommandNumber::Initialize))
        .await
        .unwrap();
    assert!(reply.is_acknowledgement());

    let reply = channel
        .send(&Command::new(CommandNumber::QueryStatus))
        .await
        .unwrap();
    let status = reply.buffer_status().unwrap();
    assert_eq!(status.queue_capacity, 20);
    assert!(!status.queue_running());

    assert_eq!(board.snapshot().received, vec!["9", "31"]);
}

#[tokio::test]
async fn test_heartbeats_and_garbage_between_replies() {
    let (channel, board) = connect(BoardState {
        chatter: true,
        ..BoardState::default()
    })
    .await;
    for _ in 0..5 {
        let reply = channel
            .send(&Command::new(CommandNumber::Move).arg(0u8).arg(100i64))
            .await
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Acknowledgement);
    }
    let last = channel
        .send(&Command::new(CommandNumber::QueryStatus))
        .await
        .unwrap();
    assert_eq!(last.buffer_status().unwrap().queue_length, 5);
    assert_eq!(board.snapshot().frames(10).len(), 5);
    assert!(channel.is_connected());
}

#[tokio::test]
async fn test_error_reply_is_returned_to_caller() {
    let (channel, _board) = connect(BoardState {
        reject: vec![1],
        ..BoardState::default()
    })
    .await;
    let reply = channel
        .send(&Command::new(CommandNumber::SetCurrent).arg(0u8).arg(1200i64))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Error);
    assert_eq!(reply.arguments, vec!["rejected"]);
}

#[tokio::test]
async fn test_reply_timeout_disconnects() {
    let settings = ChannelSettings {
        reply_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let (channel, _board) = connect_with(
        BoardState {
            silent: vec![31],
            ..BoardState::default()
        },
        settings,
    )
    .await;
    let result = channel.send(&Command::new(CommandNumber::QueryStatus)).await;
    assert!(matches!(result, Err(ChannelError::Unresponsive(_))));
    assert!(!channel.is_connected());

    let result = channel.send(&Command::new(CommandNumber::Initialize)).await;
    assert!(matches!(result, Err(ChannelError::Disconnected)));
}

#[tokio::test]
async fn test_disconnect_wakes_blocked_send() {
    let settings = ChannelSettings {
        reply_timeout: Duration::from_secs(10),
        ..fast_settings()
    };
    let (channel, _board) = connect_with(
        BoardState {
            silent: vec![31],
            ..BoardState::default()
        },
        settings,
    )
    .await;
    let started = tokio::time::Instant::now();
    let query = Command::new(CommandNumber::QueryStatus);
    let (result, ()) = tokio::join!(
        channel.send(&query),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            channel.disconnect();
        }
    );
    assert!(matches!(result, Err(ChannelError::Disconnected)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_board_hang_up_disconnects() {
    let (channel, board) = connect(BoardState::default()).await;
    board.hang_up();
    tokio::time::sleep(HEARTBEAT_INTERVAL * 3).await;
    assert!(!channel.is_connected());
    let result = channel.send(&Command::new(CommandNumber::Initialize)).await;
    assert!(matches!(result, Err(ChannelError::Disconnected)));
}

#[tokio::test]
async fn test_heartbeat_keeps_updating() {
    let (channel, board) = connect(BoardState::default()).await;
    board.update(|s| s.queue_length = 7);
    tokio::time::sleep(HEARTBEAT_INTERVAL * 3).await;
    assert_eq!(channel.heartbeat().status.queue_length, 7);
    assert!(channel.since_last_heartbeat() < HEARTBEAT_INTERVAL * 3);
}
