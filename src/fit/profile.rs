//! Global FIT message registry
//!
//! Schemas are plain data: a static table of message descriptors keyed by
//! global message number, each listing its known fields with base type,
//! scale/offset and semantic kind. The registry deliberately carries only
//! the messages this stack exchanges with the watch, not the full FIT
//! profile; adding a message is a table edit, not a new type.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::fit::base_type::BaseType;
use crate::fit::field::FieldKind;

/// Registry entry for one field of a global message
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub number: u8,
    pub base_type: BaseType,
    /// Declared wire width for output-mode definitions; `None` means one
    /// base-type slot. Incoming definitions always carry their own size.
    pub size: Option<usize>,
    pub name: &'static str,
    pub scale: i32,
    pub offset: i32,
    pub kind: FieldKind,
}

/// Registry entry for one global message
#[derive(Debug, PartialEq)]
pub struct GlobalDefinition {
    pub number: u16,
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl GlobalDefinition {
    /// Look up a field by number
    pub fn field(&self, number: u8) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// Look up a field by `(number, size)`: a spec declaring the exact size
    /// wins over a spec with no declared size.
    pub fn field_sized(&self, number: u8, size: usize) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.number == number && f.size == Some(size))
            .or_else(|| self.field(number))
    }

    /// The declared wire width of a field, defaulting to one slot
    pub fn field_size(spec: &FieldSpec) -> usize {
        spec.size.unwrap_or(spec.base_type.size())
    }
}

const fn field(number: u8, base_type: BaseType, name: &'static str) -> FieldSpec {
    FieldSpec {
        number,
        base_type,
        size: None,
        name,
        scale: 1,
        offset: 0,
        kind: FieldKind::Plain,
    }
}

const fn sized(number: u8, base_type: BaseType, size: usize, name: &'static str) -> FieldSpec {
    FieldSpec {
        number,
        base_type,
        size: Some(size),
        name,
        scale: 1,
        offset: 0,
        kind: FieldKind::Plain,
    }
}

const fn scaled(
    number: u8,
    base_type: BaseType,
    name: &'static str,
    scale: i32,
    offset: i32,
) -> FieldSpec {
    FieldSpec {
        number,
        base_type,
        size: None,
        name,
        scale,
        offset,
        kind: FieldKind::Plain,
    }
}

const fn kinded(number: u8, base_type: BaseType, name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        number,
        base_type,
        size: None,
        name,
        scale: 1,
        offset: 0,
        kind,
    }
}

const fn timestamp() -> FieldSpec {
    kinded(253, BaseType::Uint32, "timestamp", FieldKind::Timestamp)
}

pub const FILE_ID: u16 = 0;
pub const USER_PROFILE: u16 = 3;
pub const GOALS: u16 = 15;
pub const SESSION: u16 = 18;
pub const RECORD: u16 = 20;
pub const EVENT: u16 = 21;
pub const DEVICE_INFO: u16 = 23;
pub const ACTIVITY: u16 = 34;
pub const FILE_CREATOR: u16 = 49;
pub const MONITORING: u16 = 55;
pub const WEATHER: u16 = 128;
pub const FIELD_DESCRIPTION: u16 = 206;
pub const DEVELOPER_DATA: u16 = 207;
pub const ALARM_SETTINGS: u16 = 222;
pub const STRESS_LEVEL: u16 = 227;
pub const SPO2: u16 = 269;
pub const SLEEP_STAGE: u16 = 275;

static REGISTRY_TABLE: &[GlobalDefinition] = &[
    GlobalDefinition {
        number: FILE_ID,
        name: "FILE_ID",
        fields: &[
            kinded(0, BaseType::Enum, "type", FieldKind::FileType),
            field(1, BaseType::Uint16, "manufacturer"),
            field(2, BaseType::Uint16, "product"),
            field(3, BaseType::Uint32z, "serial_number"),
            kinded(4, BaseType::Uint32, "time_created", FieldKind::Timestamp),
            field(5, BaseType::Uint16, "number"),
        ],
    },
    GlobalDefinition {
        number: USER_PROFILE,
        name: "USER_PROFILE",
        fields: &[
            field(1, BaseType::Enum, "gender"),
            field(2, BaseType::Uint8, "age"),
            scaled(3, BaseType::Uint8, "height", 100, 0),
            scaled(4, BaseType::Uint16, "weight", 10, 0),
            kinded(5, BaseType::Enum, "language", FieldKind::Language),
            kinded(6, BaseType::Enum, "elev_setting", FieldKind::MeasurementSystem),
            kinded(7, BaseType::Enum, "weight_setting", FieldKind::MeasurementSystem),
            field(8, BaseType::Uint8, "resting_heart_rate"),
        ],
    },
    GlobalDefinition {
        number: GOALS,
        name: "GOALS",
        fields: &[
            field(0, BaseType::Enum, "sport"),
            kinded(4, BaseType::Enum, "type", FieldKind::GoalType),
            field(7, BaseType::Uint32, "value"),
            field(9, BaseType::Enum, "repeat"),
            kinded(11, BaseType::Enum, "source", FieldKind::GoalSource),
        ],
    },
    GlobalDefinition {
        number: SESSION,
        name: "SESSION",
        fields: &[
            timestamp(),
            kinded(2, BaseType::Uint32, "start_time", FieldKind::Timestamp),
            kinded(3, BaseType::Sint32, "start_position_lat", FieldKind::Coordinate),
            kinded(4, BaseType::Sint32, "start_position_long", FieldKind::Coordinate),
            scaled(7, BaseType::Uint32, "total_elapsed_time", 1000, 0),
            scaled(8, BaseType::Uint32, "total_timer_time", 1000, 0),
            scaled(9, BaseType::Uint32, "total_distance", 100, 0),
            field(13, BaseType::Uint16, "total_calories"),
            scaled(14, BaseType::Uint16, "avg_speed", 1000, 0),
            field(16, BaseType::Uint8, "avg_heart_rate"),
            field(17, BaseType::Uint8, "max_heart_rate"),
        ],
    },
    GlobalDefinition {
        number: RECORD,
        name: "RECORD",
        fields: &[
            timestamp(),
            kinded(0, BaseType::Sint32, "position_lat", FieldKind::Coordinate),
            kinded(1, BaseType::Sint32, "position_long", FieldKind::Coordinate),
            scaled(2, BaseType::Uint16, "altitude", 5, 500),
            field(3, BaseType::Uint8, "heart_rate"),
            field(4, BaseType::Uint8, "cadence"),
            scaled(5, BaseType::Uint32, "distance", 100, 0),
            scaled(6, BaseType::Uint16, "speed", 1000, 0),
            kinded(13, BaseType::Sint8, "temperature", FieldKind::Temperature),
        ],
    },
    GlobalDefinition {
        number: EVENT,
        name: "EVENT",
        fields: &[
            timestamp(),
            field(0, BaseType::Enum, "event"),
            field(1, BaseType::Enum, "event_type"),
            field(3, BaseType::Uint32, "data"),
        ],
    },
    GlobalDefinition {
        number: DEVICE_INFO,
        name: "DEVICE_INFO",
        fields: &[
            timestamp(),
            field(0, BaseType::Uint8, "device_index"),
            field(2, BaseType::Uint16, "manufacturer"),
            field(3, BaseType::Uint32z, "serial_number"),
            field(4, BaseType::Uint16, "product"),
            scaled(5, BaseType::Uint16, "software_version", 100, 0),
            field(11, BaseType::Uint8, "battery_status"),
        ],
    },
    GlobalDefinition {
        number: ACTIVITY,
        name: "ACTIVITY",
        fields: &[
            timestamp(),
            scaled(0, BaseType::Uint32, "total_timer_time", 1000, 0),
            field(1, BaseType::Uint16, "num_sessions"),
            field(2, BaseType::Enum, "type"),
            kinded(5, BaseType::Uint32, "local_timestamp", FieldKind::Timestamp),
        ],
    },
    GlobalDefinition {
        number: FILE_CREATOR,
        name: "FILE_CREATOR",
        fields: &[
            field(0, BaseType::Uint16, "software_version"),
            field(1, BaseType::Uint8, "hardware_version"),
        ],
    },
    GlobalDefinition {
        number: MONITORING,
        name: "MONITORING",
        fields: &[
            timestamp(),
            field(0, BaseType::Uint8, "device_index"),
            field(2, BaseType::Uint16, "calories"),
            scaled(3, BaseType::Uint32, "distance", 100, 0),
            scaled(4, BaseType::Uint32, "cycles", 2, 0),
            field(24, BaseType::Byte, "current_activity_type_intensity"),
            field(26, BaseType::Uint16, "timestamp_16"),
            field(27, BaseType::Uint8, "heart_rate"),
        ],
    },
    GlobalDefinition {
        number: WEATHER,
        name: "WEATHER",
        fields: &[
            timestamp(),
            field(0, BaseType::Enum, "weather_report"),
            kinded(1, BaseType::Sint8, "temperature", FieldKind::Temperature),
            kinded(2, BaseType::Enum, "condition", FieldKind::WeatherCondition),
            field(3, BaseType::Uint16, "wind_direction"),
            scaled(4, BaseType::Uint16, "wind_speed", 1000, 0),
            field(5, BaseType::Uint8, "precipitation_probability"),
            kinded(6, BaseType::Sint8, "temperature_feels_like", FieldKind::Temperature),
            field(7, BaseType::Uint8, "relative_humidity"),
            sized(8, BaseType::String, 64, "location"),
            kinded(9, BaseType::Uint32, "observed_at_time", FieldKind::Timestamp),
            kinded(13, BaseType::Sint8, "high_temperature", FieldKind::Temperature),
            kinded(14, BaseType::Sint8, "low_temperature", FieldKind::Temperature),
            kinded(15, BaseType::Enum, "day_of_week", FieldKind::DayOfWeek),
        ],
    },
    GlobalDefinition {
        number: FIELD_DESCRIPTION,
        name: "FIELD_DESCRIPTION",
        fields: &[
            field(0, BaseType::Uint8, "developer_data_index"),
            field(1, BaseType::Uint8, "field_definition_number"),
            field(2, BaseType::Uint8, "fit_base_type_id"),
            sized(3, BaseType::String, 64, "field_name"),
            sized(8, BaseType::String, 16, "units"),
            field(14, BaseType::Uint16, "native_mesg_num"),
        ],
    },
    GlobalDefinition {
        number: DEVELOPER_DATA,
        name: "DEVELOPER_DATA",
        fields: &[
            sized(0, BaseType::Byte, 16, "developer_id"),
            sized(1, BaseType::Byte, 16, "application_id"),
            field(3, BaseType::Uint8, "developer_data_index"),
        ],
    },
    GlobalDefinition {
        number: ALARM_SETTINGS,
        name: "ALARM_SETTINGS",
        fields: &[
            kinded(0, BaseType::Uint16, "time", FieldKind::AlarmTime),
            field(1, BaseType::Enum, "enabled"),
            kinded(2, BaseType::Enum, "day_of_week", FieldKind::DayOfWeek),
            field(3, BaseType::Enum, "repeat"),
        ],
    },
    GlobalDefinition {
        number: STRESS_LEVEL,
        name: "STRESS_LEVEL",
        fields: &[
            field(0, BaseType::Sint16, "stress_level_value"),
            kinded(1, BaseType::Uint32, "stress_level_time", FieldKind::Timestamp),
        ],
    },
    GlobalDefinition {
        number: SPO2,
        name: "SPO2",
        fields: &[
            timestamp(),
            field(0, BaseType::Uint8, "reading_spo2"),
            field(1, BaseType::Uint8, "reading_confidence"),
            field(2, BaseType::Enum, "mode"),
        ],
    },
    GlobalDefinition {
        number: SLEEP_STAGE,
        name: "SLEEP_STAGE",
        fields: &[
            timestamp(),
            kinded(0, BaseType::Enum, "sleep_stage", FieldKind::SleepStage),
        ],
    },
];

static REGISTRY: OnceLock<HashMap<u16, &'static GlobalDefinition>> = OnceLock::new();

fn registry() -> &'static HashMap<u16, &'static GlobalDefinition> {
    REGISTRY.get_or_init(|| REGISTRY_TABLE.iter().map(|def| (def.number, def)).collect())
}

/// Look up a global message descriptor by number
pub fn global_definition(number: u16) -> Option<&'static GlobalDefinition> {
    registry().get(&number).copied()
}

/// The registry name for a message number, or a synthesized `UNK_<n>`
pub fn global_message_name(number: u16) -> String {
    match global_definition(number) {
        Some(def) => def.name.to_string(),
        None => format!("UNK_{number}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_number() {
        let weather = global_definition(WEATHER).unwrap();
        assert_eq!(weather.name, "WEATHER");
        assert_eq!(weather.field(2).unwrap().name, "condition");
        assert!(global_definition(9999).is_none());
    }

    #[test]
    fn test_lookup_by_number_and_size() {
        let desc = global_definition(FIELD_DESCRIPTION).unwrap();
        let name_field = desc.field_sized(3, 64).unwrap();
        assert_eq!(name_field.name, "field_name");
        // a non-declared size still resolves by number alone
        let shorter = desc.field_sized(3, 20).unwrap();
        assert_eq!(shorter.name, "field_name");
    }

    #[test]
    fn test_unknown_name_synthesized() {
        assert_eq!(global_message_name(RECORD), "RECORD");
        assert_eq!(global_message_name(4242), "UNK_4242");
    }

    #[test]
    fn test_scale_offset_examples() {
        let record = global_definition(RECORD).unwrap();
        let altitude = record.field(2).unwrap();
        assert_eq!((altitude.scale, altitude.offset), (5, 500));
        let session = global_definition(SESSION).unwrap();
        assert_eq!(session.field(14).unwrap().scale, 1000);
    }

    #[test]
    fn test_field_size_defaults_to_slot() {
        let weather = global_definition(WEATHER).unwrap();
        assert_eq!(GlobalDefinition::field_size(weather.field(8).unwrap()), 64);
        assert_eq!(GlobalDefinition::field_size(weather.field(3).unwrap()), 2);
    }
}
