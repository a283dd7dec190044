//! Native API server exercised over a real TCP connection

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use voice_satellite::entities::catalog::follow_capability;
use voice_satellite::entities::{CameraEntity, EntityInfo, SwitchEntity, setter};
use voice_satellite::proto::{
    DeviceInfoRequest, DisconnectRequest, HelloRequest, ListEntitiesRequest, PingRequest,
    SubscribeStatesRequest, SubscribeVoiceAssistantRequest, SwitchCommandRequest,
};
use voice_satellite::settings::SettingState;
use voice_satellite::{
    ConnectionEvent, DeviceInfo, DeviceServer, EntityRegistry, FrameCodec, ProtocolMessage,
};

type Client = Framed<TcpStream, FrameCodec>;

struct Fixture {
    addr: SocketAddr,
    events: mpsc::Receiver<ConnectionEvent>,
    switch: watch::Receiver<bool>,
    cancel: CancellationToken,
}

fn device_info() -> DeviceInfo {
    DeviceInfo {
        name: "kitchen-satellite".to_string(),
        friendly_name: "Kitchen Satellite".to_string(),
        mac_address: "aa:bb:cc:dd:ee:ff".to_string(),
        manufacturer: "Omni".to_string(),
        model: "Voice Satellite".to_string(),
        suggested_area: "Kitchen".to_string(),
    }
}

async fn serve() -> Fixture {
    let (switch_tx, switch) = watch::channel(false);
    let switch_tx = Arc::new(switch_tx);
    let registry = Arc::new(EntityRegistry::new());
    registry
        .add(Arc::new(SwitchEntity::new(
            EntityInfo::new(1, "Mute", "mute"),
            switch.clone(),
            setter(move |on: bool| {
                let tx = Arc::clone(&switch_tx);
                async move {
                    tx.send_replace(on);
                    Ok(())
                }
            }),
        )))
        .unwrap();

    serve_registry(registry, switch).await
}

async fn serve_registry(registry: Arc<EntityRegistry>, switch: watch::Receiver<bool>) -> Fixture {
    let (events_tx, events) = mpsc::channel(16);
    let listener = DeviceServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = DeviceServer::new(device_info(), registry, events_tx);
    tokio::spawn(server.run(listener, cancel.clone()));

    Fixture {
        addr,
        events,
        switch,
        cancel,
    }
}

async fn connect(fixture: &mut Fixture) -> Client {
    let stream = TcpStream::connect(fixture.addr).await.unwrap();
    let client = Framed::new(stream, FrameCodec::new());
    match next_event(fixture).await {
        ConnectionEvent::Connected(_) => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    client
}

async fn next_event(fixture: &mut Fixture) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(5), fixture.events.recv())
        .await
        .expect("connection event expected")
        .expect("event channel open")
}

async fn request(client: &mut Client, message: impl Into<ProtocolMessage>) {
    client.send(message.into()).await.unwrap();
}

async fn next(client: &mut Client) -> ProtocolMessage {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("message expected")
        .expect("connection open")
        .expect("valid frame")
}

async fn listed_keys(client: &mut Client) -> Vec<u32> {
    request(client, ListEntitiesRequest {}).await;
    let mut keys = Vec::new();
    loop {
        match next(client).await {
            ProtocolMessage::ListEntitiesSwitchResponse(switch) => keys.push(switch.key),
            ProtocolMessage::ListEntitiesCameraResponse(camera) => keys.push(camera.key),
            ProtocolMessage::ListEntitiesDoneResponse(_) => return keys,
            other => panic!("unexpected descriptor {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_handshake_and_device_info() {
    let mut fixture = serve().await;
    let mut client = connect(&mut fixture).await;

    request(
        &mut client,
        HelloRequest {
            client_info: "hub".to_string(),
            api_version_major: 1,
            api_version_minor: 10,
        },
    )
    .await;
    match next(&mut client).await {
        ProtocolMessage::HelloResponse(hello) => {
            assert_eq!(hello.api_version_major, 1);
            assert_eq!(hello.api_version_minor, 10);
            assert_eq!(hello.name, "kitchen-satellite");
        }
        other => panic!("expected hello, got {other:?}"),
    }

    request(&mut client, DeviceInfoRequest {}).await;
    match next(&mut client).await {
        ProtocolMessage::DeviceInfoResponse(info) => {
            assert_eq!(info.name, "kitchen-satellite");
            assert_eq!(info.friendly_name, "Kitchen Satellite");
            assert_eq!(info.mac_address, "aa:bb:cc:dd:ee:ff");
            assert_eq!(info.suggested_area, "Kitchen");
            assert!(!info.uses_password);
            assert_ne!(info.voice_assistant_feature_flags, 0);
        }
        other => panic!("expected device info, got {other:?}"),
    }

    request(&mut client, PingRequest {}).await;
    assert!(matches!(
        next(&mut client).await,
        ProtocolMessage::PingResponse(_)
    ));

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_list_entities_ends_with_done() {
    let mut fixture = serve().await;
    let mut client = connect(&mut fixture).await;

    request(&mut client, ListEntitiesRequest {}).await;
    match next(&mut client).await {
        ProtocolMessage::ListEntitiesSwitchResponse(switch) => {
            assert_eq!(switch.key, 1);
            assert_eq!(switch.object_id, "mute");
            assert_eq!(switch.name, "Mute");
        }
        other => panic!("expected switch descriptor, got {other:?}"),
    }
    assert!(matches!(
        next(&mut client).await,
        ProtocolMessage::ListEntitiesDoneResponse(_)
    ));

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_subscribe_states_and_command() {
    let mut fixture = serve().await;
    let mut client = connect(&mut fixture).await;

    request(&mut client, SubscribeStatesRequest {}).await;
    match next(&mut client).await {
        ProtocolMessage::SwitchStateResponse(state) => {
            assert_eq!(state.key, 1);
            assert!(!state.state);
        }
        other => panic!("expected initial switch state, got {other:?}"),
    }

    request(&mut client, SwitchCommandRequest { key: 1, state: true }).await;
    request(&mut client, PingRequest {}).await;

    // The direct answer and the forwarded change may interleave with the pong
    let mut states = 0;
    loop {
        match next(&mut client).await {
            ProtocolMessage::SwitchStateResponse(state) => {
                assert!(state.state);
                states += 1;
            }
            ProtocolMessage::PingResponse(_) => break,
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert!(states >= 1);
    assert!(*fixture.switch.borrow());

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_command_for_unknown_key_is_ignored() {
    let mut fixture = serve().await;
    let mut client = connect(&mut fixture).await;

    request(&mut client, SwitchCommandRequest { key: 99, state: true }).await;
    request(&mut client, PingRequest {}).await;
    assert!(matches!(
        next(&mut client).await,
        ProtocolMessage::PingResponse(_)
    ));
    assert!(!*fixture.switch.borrow());

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_voice_messages_reach_orchestrator() {
    let mut fixture = serve().await;
    let mut client = connect(&mut fixture).await;

    request(
        &mut client,
        SubscribeVoiceAssistantRequest {
            subscribe: true,
            flags: 0,
        },
    )
    .await;
    match next_event(&mut fixture).await {
        ConnectionEvent::Voice(ProtocolMessage::SubscribeVoiceAssistantRequest(request)) => {
            assert!(request.subscribe);
        }
        other => panic!("expected voice subscription, got {other:?}"),
    }

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_disconnect_request_closes_connection() {
    let mut fixture = serve().await;
    let mut client = connect(&mut fixture).await;

    request(&mut client, DisconnectRequest {}).await;
    assert!(matches!(
        next(&mut client).await,
        ProtocolMessage::DisconnectResponse(_)
    ));
    assert!(matches!(
        next_event(&mut fixture).await,
        ConnectionEvent::Disconnected
    ));

    let end = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("connection should close");
    assert!(end.is_none());

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_new_connection_replaces_current() {
    let mut fixture = serve().await;
    let mut first = connect(&mut fixture).await;

    let _second = TcpStream::connect(fixture.addr).await.unwrap();
    assert!(matches!(
        next_event(&mut fixture).await,
        ConnectionEvent::Disconnected
    ));
    assert!(matches!(
        next_event(&mut fixture).await,
        ConnectionEvent::Connected(_)
    ));

    let end = tokio::time::timeout(Duration::from_secs(5), first.next())
        .await
        .expect("old connection should close");
    assert!(end.is_none());

    fixture.cancel.cancel();
}

#[tokio::test]
async fn test_camera_toggle_adds_and_removes_entity() {
    let enabled = SettingState::new(false);
    let registry = Arc::new(EntityRegistry::new());
    let toggle = enabled.clone();
    registry
        .add(Arc::new(SwitchEntity::new(
            EntityInfo::new(12, "Enable Camera", "camera_enabled"),
            enabled.subscribe(),
            setter(move |on: bool| {
                let toggle = toggle.clone();
                async move {
                    toggle.set(on);
                    Ok(())
                }
            }),
        )))
        .unwrap();

    let mut fixture = serve_registry(Arc::clone(&registry), enabled.subscribe()).await;
    tokio::spawn(follow_capability(
        enabled.subscribe(),
        Arc::new(CameraEntity::new(EntityInfo::new(11, "Camera", "camera"))),
        Arc::clone(&registry),
        fixture.cancel.clone(),
    ));
    let mut client = connect(&mut fixture).await;

    assert_eq!(listed_keys(&mut client).await, vec![12]);

    for (on, expected) in [(true, vec![12, 11]), (false, vec![12]), (true, vec![12, 11])] {
        request(&mut client, SwitchCommandRequest { key: 12, state: on }).await;
        let mut keys = Vec::new();
        for _ in 0..50 {
            // Drain the switch state echo before listing
            request(&mut client, PingRequest {}).await;
            while !matches!(next(&mut client).await, ProtocolMessage::PingResponse(_)) {}
            keys = listed_keys(&mut client).await;
            if keys == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(keys, expected, "camera enabled = {on}");
        assert_eq!(*fixture.switch.borrow(), on);
    }

    fixture.cancel.cancel();
}
