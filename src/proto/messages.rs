//! Protobuf messages of the native device API
//!
//! Field tags match the hub's `api.proto`; only the messages a voice
//! satellite exchanges are defined.

// Session

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub client_info: String,
    #[prost(uint32, tag = "2")]
    pub api_version_major: u32,
    #[prost(uint32, tag = "3")]
    pub api_version_minor: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloResponse {
    #[prost(uint32, tag = "1")]
    pub api_version_major: u32,
    #[prost(uint32, tag = "2")]
    pub api_version_minor: u32,
    #[prost(string, tag = "3")]
    pub server_info: String,
    #[prost(string, tag = "4")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub password: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectResponse {
    #[prost(bool, tag = "1")]
    pub invalid_password: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisconnectRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisconnectResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceInfoRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceInfoResponse {
    #[prost(bool, tag = "1")]
    pub uses_password: bool,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub mac_address: String,
    #[prost(string, tag = "4")]
    pub esphome_version: String,
    #[prost(string, tag = "5")]
    pub compilation_time: String,
    #[prost(string, tag = "6")]
    pub model: String,
    #[prost(string, tag = "8")]
    pub project_name: String,
    #[prost(string, tag = "9")]
    pub project_version: String,
    #[prost(string, tag = "12")]
    pub manufacturer: String,
    #[prost(string, tag = "13")]
    pub friendly_name: String,
    #[prost(string, tag = "16")]
    pub suggested_area: String,
    #[prost(uint32, tag = "17")]
    pub voice_assistant_feature_flags: u32,
}

// Entity listing and state

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EntityCategory {
    None = 0,
    Config = 1,
    Diagnostic = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SensorStateClass {
    None = 0,
    Measurement = 1,
    TotalIncreasing = 2,
    Total = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NumberMode {
    Auto = 0,
    Box = 1,
    Slider = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TextMode {
    Text = 0,
    Password = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesDoneResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeStatesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeHomeAssistantStatesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesBinarySensorResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub device_class: String,
    #[prost(bool, tag = "6")]
    pub is_status_binary_sensor: bool,
    #[prost(bool, tag = "7")]
    pub disabled_by_default: bool,
    #[prost(string, tag = "8")]
    pub icon: String,
    #[prost(enumeration = "EntityCategory", tag = "9")]
    pub entity_category: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BinarySensorStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesSensorResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(string, tag = "6")]
    pub unit_of_measurement: String,
    #[prost(int32, tag = "7")]
    pub accuracy_decimals: i32,
    #[prost(bool, tag = "8")]
    pub force_update: bool,
    #[prost(string, tag = "9")]
    pub device_class: String,
    #[prost(enumeration = "SensorStateClass", tag = "10")]
    pub state_class: i32,
    #[prost(bool, tag = "12")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "13")]
    pub entity_category: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SensorStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(float, tag = "2")]
    pub state: f32,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesSwitchResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(bool, tag = "6")]
    pub assumed_state: bool,
    #[prost(bool, tag = "7")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "8")]
    pub entity_category: i32,
    #[prost(string, tag = "9")]
    pub device_class: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SwitchStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SwitchCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub state: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesTextSensorResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(bool, tag = "6")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "7")]
    pub entity_category: i32,
    #[prost(string, tag = "8")]
    pub device_class: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TextSensorStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(string, tag = "2")]
    pub state: String,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

// Services

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServiceArgType {
    Bool = 0,
    Int = 1,
    Float = 2,
    String = 3,
    BoolArray = 4,
    IntArray = 5,
    FloatArray = 6,
    StringArray = 7,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesServicesArgument {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "ServiceArgType", tag = "2")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesServicesResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(message, repeated, tag = "3")]
    pub args: Vec<ListEntitiesServicesArgument>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteServiceArgument {
    #[prost(bool, tag = "1")]
    pub bool_: bool,
    #[prost(int32, tag = "2")]
    pub legacy_int: i32,
    #[prost(float, tag = "3")]
    pub float_: f32,
    #[prost(string, tag = "4")]
    pub string_: String,
    #[prost(sint32, tag = "5")]
    pub int_: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteServiceRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(message, repeated, tag = "2")]
    pub args: Vec<ExecuteServiceArgument>,
}

// Camera

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesCameraResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(bool, tag = "5")]
    pub disabled_by_default: bool,
    #[prost(string, tag = "6")]
    pub icon: String,
    #[prost(enumeration = "EntityCategory", tag = "7")]
    pub entity_category: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CameraImageResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub done: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CameraImageRequest {
    #[prost(bool, tag = "1")]
    pub single: bool,
    #[prost(bool, tag = "2")]
    pub stream: bool,
}

// Number

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesNumberResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(float, tag = "6")]
    pub min_value: f32,
    #[prost(float, tag = "7")]
    pub max_value: f32,
    #[prost(float, tag = "8")]
    pub step: f32,
    #[prost(bool, tag = "9")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "10")]
    pub entity_category: i32,
    #[prost(string, tag = "11")]
    pub unit_of_measurement: String,
    #[prost(enumeration = "NumberMode", tag = "12")]
    pub mode: i32,
    #[prost(string, tag = "13")]
    pub device_class: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NumberStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(float, tag = "2")]
    pub state: f32,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NumberCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(float, tag = "2")]
    pub state: f32,
}

// Select

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesSelectResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(string, repeated, tag = "6")]
    pub options: Vec<String>,
    #[prost(bool, tag = "7")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "8")]
    pub entity_category: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SelectStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(string, tag = "2")]
    pub state: String,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SelectCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(string, tag = "2")]
    pub state: String,
}

// Button

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesButtonResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(bool, tag = "6")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "7")]
    pub entity_category: i32,
    #[prost(string, tag = "8")]
    pub device_class: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ButtonCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
}

// Media player

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MediaPlayerState {
    None = 0,
    Idle = 1,
    Playing = 2,
    Paused = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MediaPlayerCommand {
    Play = 0,
    Pause = 1,
    Stop = 2,
    Mute = 3,
    Unmute = 4,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesMediaPlayerResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(bool, tag = "6")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "7")]
    pub entity_category: i32,
    #[prost(bool, tag = "8")]
    pub supports_pause: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MediaPlayerStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(enumeration = "MediaPlayerState", tag = "2")]
    pub state: i32,
    #[prost(float, tag = "3")]
    pub volume: f32,
    #[prost(bool, tag = "4")]
    pub muted: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MediaPlayerCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(bool, tag = "2")]
    pub has_command: bool,
    #[prost(enumeration = "MediaPlayerCommand", tag = "3")]
    pub command: i32,
    #[prost(bool, tag = "4")]
    pub has_volume: bool,
    #[prost(float, tag = "5")]
    pub volume: f32,
    #[prost(bool, tag = "6")]
    pub has_media_url: bool,
    #[prost(string, tag = "7")]
    pub media_url: String,
    #[prost(bool, tag = "8")]
    pub has_announcement: bool,
    #[prost(bool, tag = "9")]
    pub announcement: bool,
}

// Text

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListEntitiesTextResponse {
    #[prost(string, tag = "1")]
    pub object_id: String,
    #[prost(fixed32, tag = "2")]
    pub key: u32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub unique_id: String,
    #[prost(string, tag = "5")]
    pub icon: String,
    #[prost(bool, tag = "6")]
    pub disabled_by_default: bool,
    #[prost(enumeration = "EntityCategory", tag = "7")]
    pub entity_category: i32,
    #[prost(uint32, tag = "8")]
    pub min_length: u32,
    #[prost(uint32, tag = "9")]
    pub max_length: u32,
    #[prost(string, tag = "10")]
    pub pattern: String,
    #[prost(enumeration = "TextMode", tag = "11")]
    pub mode: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TextStateResponse {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(string, tag = "2")]
    pub state: String,
    #[prost(bool, tag = "3")]
    pub missing_state: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TextCommandRequest {
    #[prost(fixed32, tag = "1")]
    pub key: u32,
    #[prost(string, tag = "2")]
    pub state: String,
}

// Voice assistant

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum VoiceAssistantEvent {
    Error = 0,
    RunStart = 1,
    RunEnd = 2,
    SttStart = 3,
    SttEnd = 4,
    IntentStart = 5,
    IntentEnd = 6,
    TtsStart = 7,
    TtsEnd = 8,
    WakeWordStart = 9,
    WakeWordEnd = 10,
    SttVadStart = 11,
    SttVadEnd = 12,
    TtsStreamStart = 98,
    TtsStreamEnd = 99,
    IntentProgress = 100,
}

/// Feature bits advertised in `DeviceInfoResponse`
pub mod voice_assistant_feature {
    pub const VOICE_ASSISTANT: u32 = 1 << 0;
    pub const SPEAKER: u32 = 1 << 1;
    pub const API_AUDIO: u32 = 1 << 2;
    pub const TIMERS: u32 = 1 << 3;
    pub const ANNOUNCE: u32 = 1 << 4;
    pub const START_CONVERSATION: u32 = 1 << 5;
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeVoiceAssistantRequest {
    #[prost(bool, tag = "1")]
    pub subscribe: bool,
    #[prost(uint32, tag = "2")]
    pub flags: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantAudioSettings {
    #[prost(uint32, tag = "1")]
    pub noise_suppression_level: u32,
    #[prost(uint32, tag = "2")]
    pub auto_gain: u32,
    #[prost(float, tag = "3")]
    pub volume_multiplier: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantRequest {
    #[prost(bool, tag = "1")]
    pub start: bool,
    #[prost(string, tag = "2")]
    pub conversation_id: String,
    #[prost(uint32, tag = "3")]
    pub flags: u32,
    #[prost(message, optional, tag = "4")]
    pub audio_settings: Option<VoiceAssistantAudioSettings>,
    #[prost(string, tag = "5")]
    pub wake_word_phrase: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantResponse {
    #[prost(uint32, tag = "1")]
    pub port: u32,
    #[prost(bool, tag = "2")]
    pub error: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantEventData {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantEventResponse {
    #[prost(enumeration = "VoiceAssistantEvent", tag = "1")]
    pub event_type: i32,
    #[prost(message, repeated, tag = "2")]
    pub data: Vec<VoiceAssistantEventData>,
}

impl VoiceAssistantEventResponse {
    /// Value of the named data pair, if present
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantAudio {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(bool, tag = "2")]
    pub end: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantAnnounceRequest {
    #[prost(string, tag = "1")]
    pub media_id: String,
    #[prost(string, tag = "2")]
    pub text: String,
    #[prost(string, tag = "3")]
    pub preannounce_media_id: String,
    #[prost(bool, tag = "4")]
    pub start_conversation: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantAnnounceFinished {
    #[prost(bool, tag = "1")]
    pub success: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantWakeWord {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub wake_word: String,
    #[prost(string, repeated, tag = "3")]
    pub trained_languages: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantConfigurationRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantConfigurationResponse {
    #[prost(message, repeated, tag = "1")]
    pub available_wake_words: Vec<VoiceAssistantWakeWord>,
    #[prost(string, repeated, tag = "2")]
    pub active_wake_words: Vec<String>,
    #[prost(uint32, tag = "3")]
    pub max_active_wake_words: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoiceAssistantSetConfiguration {
    #[prost(string, repeated, tag = "1")]
    pub active_wake_words: Vec<String>,
}
