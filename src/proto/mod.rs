//! Native device API wire protocol
//!
//! Messages are protobuf payloads carried in plaintext frames (see
//! [`FrameCodec`]). [`ProtocolMessage`] is the closed set of messages the
//! satellite understands, keyed by their numeric type id.

mod codec;
pub mod messages;

pub use codec::{FrameCodec, MAX_FRAME_LEN};
pub use messages::*;

use prost::Message as _;

macro_rules! protocol_messages {
    ($($id:literal => $name:ident),* $(,)?) => {
        /// Every message that can cross the hub connection
        #[derive(Debug, Clone, PartialEq)]
        pub enum ProtocolMessage {
            $($name($name),)*
        }

        impl ProtocolMessage {
            /// Numeric message type id used in the frame header
            #[must_use]
            pub const fn type_id(&self) -> u32 {
                match self {
                    $(Self::$name(_) => $id,)*
                }
            }

            /// Encode the protobuf payload (without frame header)
            #[must_use]
            pub fn encode_payload(&self) -> Vec<u8> {
                match self {
                    $(Self::$name(m) => m.encode_to_vec(),)*
                }
            }

            /// Decode a payload for the given type id
            ///
            /// Returns `Ok(None)` for type ids this satellite does not know.
            ///
            /// # Errors
            ///
            /// Returns error if the payload is not valid protobuf for the type
            pub fn decode(type_id: u32, payload: &[u8]) -> Result<Option<Self>, prost::DecodeError> {
                let message = match type_id {
                    $($id => Self::$name($name::decode(payload)?),)*
                    _ => return Ok(None),
                };
                Ok(Some(message))
            }
        }

        $(
            impl From<$name> for ProtocolMessage {
                fn from(message: $name) -> Self {
                    Self::$name(message)
                }
            }
        )*
    };
}

protocol_messages! {
    1 => HelloRequest,
    2 => HelloResponse,
    3 => ConnectRequest,
    4 => ConnectResponse,
    5 => DisconnectRequest,
    6 => DisconnectResponse,
    7 => PingRequest,
    8 => PingResponse,
    9 => DeviceInfoRequest,
    10 => DeviceInfoResponse,
    11 => ListEntitiesRequest,
    12 => ListEntitiesBinarySensorResponse,
    16 => ListEntitiesSensorResponse,
    17 => ListEntitiesSwitchResponse,
    18 => ListEntitiesTextSensorResponse,
    19 => ListEntitiesDoneResponse,
    20 => SubscribeStatesRequest,
    21 => BinarySensorStateResponse,
    25 => SensorStateResponse,
    26 => SwitchStateResponse,
    27 => TextSensorStateResponse,
    33 => SwitchCommandRequest,
    38 => SubscribeHomeAssistantStatesRequest,
    41 => ListEntitiesServicesResponse,
    42 => ExecuteServiceRequest,
    43 => ListEntitiesCameraResponse,
    44 => CameraImageResponse,
    45 => CameraImageRequest,
    49 => ListEntitiesNumberResponse,
    50 => NumberStateResponse,
    51 => NumberCommandRequest,
    52 => ListEntitiesSelectResponse,
    53 => SelectStateResponse,
    54 => SelectCommandRequest,
    61 => ListEntitiesButtonResponse,
    62 => ButtonCommandRequest,
    63 => ListEntitiesMediaPlayerResponse,
    64 => MediaPlayerStateResponse,
    65 => MediaPlayerCommandRequest,
    89 => SubscribeVoiceAssistantRequest,
    90 => VoiceAssistantRequest,
    91 => VoiceAssistantResponse,
    92 => VoiceAssistantEventResponse,
    97 => ListEntitiesTextResponse,
    98 => TextStateResponse,
    99 => TextCommandRequest,
    106 => VoiceAssistantAudio,
    119 => VoiceAssistantAnnounceRequest,
    120 => VoiceAssistantAnnounceFinished,
    121 => VoiceAssistantConfigurationRequest,
    122 => VoiceAssistantConfigurationResponse,
    123 => VoiceAssistantSetConfiguration,
}

impl ProtocolMessage {
    /// Whether the message belongs to the voice-assistant pipeline
    #[must_use]
    pub const fn is_voice_assistant(&self) -> bool {
        matches!(
            self,
            Self::SubscribeVoiceAssistantRequest(_)
                | Self::VoiceAssistantResponse(_)
                | Self::VoiceAssistantEventResponse(_)
                | Self::VoiceAssistantAudio(_)
                | Self::VoiceAssistantAnnounceRequest(_)
                | Self::VoiceAssistantConfigurationRequest(_)
                | Self::VoiceAssistantSetConfiguration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ids() {
        assert_eq!(ProtocolMessage::from(HelloRequest::default()).type_id(), 1);
        assert_eq!(ProtocolMessage::from(SwitchCommandRequest::default()).type_id(), 33);
        assert_eq!(
            ProtocolMessage::from(VoiceAssistantEventResponse::default()).type_id(),
            92
        );
    }

    #[test]
    fn test_unknown_type_is_none() {
        assert_eq!(ProtocolMessage::decode(9999, &[]).unwrap(), None);
    }

    #[test]
    fn test_decode_switch_command() {
        let original = SwitchCommandRequest { key: 7, state: true };
        let payload = ProtocolMessage::from(original.clone()).encode_payload();
        let decoded = ProtocolMessage::decode(33, &payload).unwrap();
        assert_eq!(decoded, Some(ProtocolMessage::SwitchCommandRequest(original)));
    }

    #[test]
    fn test_event_value_lookup() {
        let event = VoiceAssistantEventResponse {
            event_type: VoiceAssistantEvent::SttEnd as i32,
            data: vec![VoiceAssistantEventData {
                name: "text".to_string(),
                value: "hello".to_string(),
            }],
        };
        assert_eq!(event.value("text"), Some("hello"));
        assert_eq!(event.value("url"), None);
    }
}
