//! Entity kinds and their declarative definitions.
//!
//! Every document in the store belongs to exactly one [`EntityKind`]; the
//! kind's [`EntityDefinition`] says which fields a document must carry,
//! which of them reference other documents, what must stay unique and how
//! time-series kinds are paged.

use std::fmt;
use std::str::FromStr;

/// How uniqueness is enforced for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uniqueness {
    /// The natural key is the document key; the store rejects a second insert.
    DocumentKey,
    /// A field checked against every live document of the type before insert.
    Field(&'static str),
}

/// Ordered secondary view used for paged reads of time-series entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeView {
    /// Owner reference the view is scoped by, first component of the key.
    pub owner_field: Option<&'static str>,
    /// Field the rows are ordered by (coerced to a number).
    pub ordering_field: &'static str,
    /// Page size used when the caller does not give a usable `rows`.
    pub default_rows: u64,
}

/// Declarative schema for one entity kind.
#[derive(Debug)]
pub struct EntityDefinition {
    pub kind: EntityKind,
    pub type_tag: &'static str,
    pub own_fields: &'static [&'static str],
    pub owner_fields: &'static [&'static str],
    pub unique: Option<Uniqueness>,
    /// Field used to find a document for update/destroy without its key.
    pub natural_key: &'static str,
    /// Fields stored as password hashes, never in plain text.
    pub secret_fields: &'static [&'static str],
    pub range_view: Option<RangeView>,
    /// Topic segment naming this entity on the ingestion transport.
    pub topic: Option<&'static str>,
}

impl EntityDefinition {
    /// All fields a create body must carry.
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> {
        self.own_fields
            .iter()
            .chain(self.owner_fields.iter())
            .copied()
    }

    /// True if the field survives stripping on create and update.
    pub fn allows(&self, field: &str) -> bool {
        self.own_fields.contains(&field) || self.owner_fields.contains(&field)
    }

    pub fn is_owner_field(&self, field: &str) -> bool {
        self.owner_fields.contains(&field)
    }

    pub fn is_secret(&self, field: &str) -> bool {
        self.secret_fields.contains(&field)
    }

    /// Name of the field whose value must be unique, if any.
    pub fn unique_field(&self) -> Option<&'static str> {
        match self.unique {
            Some(Uniqueness::DocumentKey) => Some(crate::models::KEY_FIELD),
            Some(Uniqueness::Field(field)) => Some(field),
            None => None,
        }
    }

    /// Pairs of (`new<Field>`, field) accepted by update.
    ///
    /// Reserved fields (leading underscore) cannot be renamed.
    pub fn renames(&self) -> impl Iterator<Item = (String, &'static str)> {
        self.own_fields
            .iter()
            .filter(|field| !field.starts_with('_'))
            .map(|field| (rename_field(field), *field))
    }
}

fn rename_field(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => format!("new{}{}", first.to_uppercase(), chars.as_str()),
        None => "new".to_string(),
    }
}

/// The finite set of entity kinds the system stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Parent,
    Child,
    Smartwatch,
    Atmosphere,
    AtmosphereAlert,
    LocationHistory,
    HeartRateHistory,
    LightSensorHistory,
    RoomTempHistory,
    NoiseLevelHistory,
    PanicHistory,
    ObjectHistory,
    EquipmentHistory,
}

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Parent,
        EntityKind::Child,
        EntityKind::Smartwatch,
        EntityKind::Atmosphere,
        EntityKind::AtmosphereAlert,
        EntityKind::LocationHistory,
        EntityKind::HeartRateHistory,
        EntityKind::LightSensorHistory,
        EntityKind::RoomTempHistory,
        EntityKind::NoiseLevelHistory,
        EntityKind::PanicHistory,
        EntityKind::ObjectHistory,
        EntityKind::EquipmentHistory,
    ];

    /// Returns the static definition for this kind.
    pub fn definition(self) -> &'static EntityDefinition {
        match self {
            EntityKind::Parent => &PARENT,
            EntityKind::Child => &CHILD,
            EntityKind::Smartwatch => &SMARTWATCH,
            EntityKind::Atmosphere => &ATMOSPHERE,
            EntityKind::AtmosphereAlert => &ATMOSPHERE_ALERT,
            EntityKind::LocationHistory => &LOCATION_HISTORY,
            EntityKind::HeartRateHistory => &HEART_RATE_HISTORY,
            EntityKind::LightSensorHistory => &LIGHT_SENSOR_HISTORY,
            EntityKind::RoomTempHistory => &ROOM_TEMP_HISTORY,
            EntityKind::NoiseLevelHistory => &NOISE_LEVEL_HISTORY,
            EntityKind::PanicHistory => &PANIC_HISTORY,
            EntityKind::ObjectHistory => &OBJECT_HISTORY,
            EntityKind::EquipmentHistory => &EQUIPMENT_HISTORY,
        }
    }

    pub fn type_tag(self) -> &'static str {
        self.definition().type_tag
    }

    /// Path segment used by the HTTP surface (`heartRateHistory`, ...).
    pub fn route_name(self) -> &'static str {
        match self {
            EntityKind::Parent => "parent",
            EntityKind::Child => "child",
            EntityKind::Smartwatch => "smartwatch",
            EntityKind::Atmosphere => "atmosphere",
            EntityKind::AtmosphereAlert => "atmosphereAlert",
            EntityKind::LocationHistory => "locationHistory",
            EntityKind::HeartRateHistory => "heartRateHistory",
            EntityKind::LightSensorHistory => "lightSensorHistory",
            EntityKind::RoomTempHistory => "roomTempHistory",
            EntityKind::NoiseLevelHistory => "noiseLevelHistory",
            EntityKind::PanicHistory => "panicHistory",
            EntityKind::ObjectHistory => "objectHistory",
            EntityKind::EquipmentHistory => "equipmentHistory",
        }
    }

    /// Looks a kind up by the type tag stamped on its documents.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_tag() == tag)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_tag())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    /// Parses a route name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.route_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown entity '{}'", s))
    }
}

const fn history_view(owner_field: Option<&'static str>, default_rows: u64) -> Option<RangeView> {
    Some(RangeView {
        owner_field,
        ordering_field: "date",
        default_rows,
    })
}

static PARENT: EntityDefinition = EntityDefinition {
    kind: EntityKind::Parent,
    type_tag: "Parent",
    own_fields: &["_id", "email", "password", "phoneNumber"],
    owner_fields: &[],
    unique: Some(Uniqueness::DocumentKey),
    natural_key: "_id",
    secret_fields: &["password"],
    range_view: None,
    topic: None,
};

static CHILD: EntityDefinition = EntityDefinition {
    kind: EntityKind::Child,
    type_tag: "Child",
    own_fields: &["name"],
    owner_fields: &["Parent", "Smartwatch"],
    unique: Some(Uniqueness::Field("name")),
    natural_key: "name",
    secret_fields: &[],
    range_view: None,
    topic: None,
};

static SMARTWATCH: EntityDefinition = EntityDefinition {
    kind: EntityKind::Smartwatch,
    type_tag: "Smartwatch",
    own_fields: &["serialNumber", "active"],
    owner_fields: &["Parent"],
    unique: Some(Uniqueness::Field("serialNumber")),
    natural_key: "serialNumber",
    secret_fields: &[],
    range_view: None,
    topic: None,
};

static ATMOSPHERE: EntityDefinition = EntityDefinition {
    kind: EntityKind::Atmosphere,
    type_tag: "Atmosphere",
    own_fields: &["location"],
    owner_fields: &["Parent"],
    unique: Some(Uniqueness::Field("location")),
    natural_key: "location",
    secret_fields: &[],
    range_view: None,
    topic: None,
};

static ATMOSPHERE_ALERT: EntityDefinition = EntityDefinition {
    kind: EntityKind::AtmosphereAlert,
    type_tag: "AtmosphereAlert",
    own_fields: &["type", "details", "date"],
    owner_fields: &["Atmosphere"],
    unique: None,
    natural_key: "date",
    secret_fields: &[],
    range_view: None,
    topic: None,
};

static LOCATION_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::LocationHistory,
    type_tag: "LocationHistory",
    own_fields: &["location", "currentlyThere", "date"],
    owner_fields: &["Smartwatch"],
    unique: None,
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(Some("Smartwatch"), 10),
    topic: Some("locationHistory"),
};

static HEART_RATE_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::HeartRateHistory,
    type_tag: "HeartRateHistory",
    own_fields: &["date", "reading"],
    owner_fields: &["Smartwatch"],
    unique: Some(Uniqueness::Field("date")),
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(Some("Smartwatch"), 5),
    topic: Some("heartRateHistory"),
};

static LIGHT_SENSOR_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::LightSensorHistory,
    type_tag: "LightSensorHistory",
    own_fields: &["date", "reading"],
    owner_fields: &["Smartwatch"],
    unique: Some(Uniqueness::Field("date")),
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(Some("Smartwatch"), 5),
    topic: Some("lightSensorHistory"),
};

static ROOM_TEMP_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::RoomTempHistory,
    type_tag: "RoomTempHistory",
    own_fields: &["date", "reading", "location"],
    owner_fields: &[],
    unique: None,
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(None, 5),
    topic: Some("roomTempHistory"),
};

static NOISE_LEVEL_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::NoiseLevelHistory,
    type_tag: "NoiseLevelHistory",
    own_fields: &["date", "reading"],
    owner_fields: &["Atmosphere"],
    unique: Some(Uniqueness::Field("date")),
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(Some("Atmosphere"), 5),
    topic: None,
};

static PANIC_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::PanicHistory,
    type_tag: "PanicHistory",
    own_fields: &["date", "dismissed"],
    owner_fields: &["Smartwatch"],
    unique: Some(Uniqueness::Field("date")),
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(Some("Smartwatch"), 5),
    topic: Some("panicHistory"),
};

static OBJECT_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::ObjectHistory,
    type_tag: "ObjectHistory",
    own_fields: &["location", "img", "date"],
    owner_fields: &["Atmosphere"],
    unique: None,
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(Some("Atmosphere"), 10),
    topic: Some("objectHistory"),
};

static EQUIPMENT_HISTORY: EntityDefinition = EntityDefinition {
    kind: EntityKind::EquipmentHistory,
    type_tag: "EquipmentHistory",
    own_fields: &["date", "equipped"],
    owner_fields: &["Smartwatch"],
    unique: Some(Uniqueness::Field("date")),
    natural_key: "date",
    secret_fields: &[],
    range_view: history_view(Some("Smartwatch"), 10),
    topic: Some("equipmentHistory"),
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_point_back_to_their_kind() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.definition().kind, kind);
        }
    }

    #[test]
    fn test_owner_fields_name_existing_kinds() {
        for kind in EntityKind::ALL {
            for owner in kind.definition().owner_fields {
                assert!(
                    EntityKind::from_type_tag(owner).is_some(),
                    "{} references unknown owner {}",
                    kind,
                    owner
                );
            }
        }
    }

    #[test]
    fn test_route_name_parse() {
        assert_eq!(
            "heartRateHistory".parse::<EntityKind>().unwrap(),
            EntityKind::HeartRateHistory
        );
        assert_eq!("CHILD".parse::<EntityKind>().unwrap(), EntityKind::Child);
        assert!("dish".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_renames_skip_reserved_fields() {
        let renames: Vec<_> = EntityKind::Parent.definition().renames().collect();
        assert!(renames.iter().all(|(_, field)| *field != "_id"));
        assert!(renames.contains(&("newPhoneNumber".to_string(), "phoneNumber")));

        let renames: Vec<_> = EntityKind::Smartwatch.definition().renames().collect();
        assert!(renames.contains(&("newSerialNumber".to_string(), "serialNumber")));
    }

    #[test]
    fn test_unique_field() {
        assert_eq!(EntityKind::Parent.definition().unique_field(), Some("_id"));
        assert_eq!(EntityKind::Child.definition().unique_field(), Some("name"));
        assert_eq!(EntityKind::ObjectHistory.definition().unique_field(), None);
    }

    #[test]
    fn test_ingestible_kinds() {
        let topics: Vec<_> = EntityKind::ALL
            .into_iter()
            .filter_map(|kind| kind.definition().topic)
            .collect();
        assert_eq!(topics.len(), 7);
        assert!(topics.contains(&"heartRateHistory"));
        assert!(!topics.contains(&"noiseLevelHistory"));
    }

    #[test]
    fn test_range_views_only_on_histories() {
        for kind in EntityKind::ALL {
            let ranged = kind.definition().range_view.is_some();
            assert_eq!(ranged, kind.type_tag().ends_with("History"), "{}", kind);
        }
    }
}
