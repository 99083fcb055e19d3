//! InfluxDB line protocol output formatter.

use crate::output::{AlertRow, OutputFormatter, PresenceRow};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => write!(
                f,
                "\"{}\"",
                s.replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n")
                    .replace('\r', "\\r")
            ),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ' ' | ',' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Adds a tag unless its value is empty, which line protocol rejects.
/// Line breaks would end the line early, so they become spaces.
fn insert_tag(tags: &mut BTreeMap<String, String>, key: &str, value: &str) {
    let value = value.replace(['\n', '\r'], " ");
    if value.trim().is_empty() {
        return;
    }
    tags.insert(key.to_string(), value);
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(time) = data_point.timestamp {
        // clocks before the epoch are written as the epoch
        let nanos = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Presence lines go to the configured measurement, alert lines to the same
/// name with an `_alert` suffix.
pub struct InfluxDbFormatter {
    measurement_name: String,
    alert_measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        let alert_measurement_name = format!("{measurement_name}_alert");
        Self {
            measurement_name,
            alert_measurement_name,
        }
    }

    fn presence_tags(row: &PresenceRow<'_>) -> BTreeMap<String, String> {
        let identity = row.observation.identity();
        let mut tags = BTreeMap::new();
        insert_tag(&mut tags, "address", &identity.address);
        insert_tag(&mut tags, "uuid", &identity.uuid);
        insert_tag(&mut tags, "major", &identity.major.to_string());
        insert_tag(&mut tags, "minor", &identity.minor.to_string());
        if let Some(record) = row.association {
            insert_tag(&mut tags, "label", &record.label);
        }
        if let Some(name) = row.observation.name() {
            insert_tag(&mut tags, "name", name);
        }
        tags
    }

    fn presence_fields(row: &PresenceRow<'_>) -> BTreeMap<String, FieldValue> {
        let observation = row.observation;
        let mut fields = BTreeMap::new();
        fields.insert(
            "rssi".into(),
            FieldValue::Integer(observation.signal_strength().into()),
        );
        fields.insert(
            "reference_level".into(),
            FieldValue::Integer(observation.identity().reference_level.into()),
        );
        fields.insert(
            "threshold".into(),
            FieldValue::Integer(observation.threshold().into()),
        );
        insert_distance(&mut fields, observation.distance());
        if let Some(record) = row.association {
            fields.insert("value".into(), FieldValue::String(record.value.clone()));
        }
        fields
    }

    fn presence_point(&self, row: &PresenceRow<'_>) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: Self::presence_tags(row),
            field_set: Self::presence_fields(row),
            timestamp: Some(row.timestamp),
        }
    }

    fn alert_point(&self, row: &AlertRow<'_>) -> DataPoint {
        let mut tags = BTreeMap::new();
        insert_tag(&mut tags, "address", &row.alert.address);
        insert_tag(&mut tags, "label", &row.association.label);
        insert_tag(&mut tags, "kind", row.alert.kind.as_str());

        let mut fields = BTreeMap::new();
        fields.insert("id".into(), FieldValue::Integer(row.alert.id.into()));
        fields.insert(
            "value".into(),
            FieldValue::String(row.association.value.clone()),
        );
        insert_distance(&mut fields, row.distance);

        DataPoint {
            measurement: self.alert_measurement_name.clone(),
            tag_set: tags,
            field_set: fields,
            timestamp: Some(row.timestamp),
        }
    }
}

fn insert_distance(fields: &mut BTreeMap<String, FieldValue>, distance: f64) {
    if distance.is_finite() {
        fields.insert("distance".into(), FieldValue::Float(distance));
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format_presence(&self, row: &PresenceRow<'_>) -> String {
        format!("{}", self.presence_point(row))
    }

    fn format_alert(&self, row: &AlertRow<'_>) -> String {
        format!("{}", self.alert_point(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::REFERENCE_UNKNOWN;
    use crate::notify::{Alert, AlertKind};
    use crate::store::{AssociationRecord, NotifyPolicy};
    use crate::test_utils::{TEST_ADDRESS, identity};
    use crate::tracker::PresenceTracker;
    use std::time::Duration;

    const UUID: &str = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";

    fn timestamp() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1000000000)
    }

    fn record(label: &str, value: &str) -> AssociationRecord {
        AssociationRecord {
            address: TEST_ADDRESS.to_string(),
            uuid: UUID.to_string(),
            major: 1,
            minor: 2,
            label: label.to_string(),
            value: value.to_string(),
            notify: NotifyPolicy::Always,
        }
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(format!("{}", FieldValue::Float(3.14)), "3.14");
        assert_eq!(format!("{}", FieldValue::Integer(-60)), "-60i");
        assert_eq!(
            format!("{}", FieldValue::String("test".to_string())),
            "\"test\""
        );
        assert_eq!(
            format!("{}", FieldValue::String("say \"hi\"".to_string())),
            "\"say \\\"hi\\\"\""
        );
        assert_eq!(
            format!("{}", FieldValue::String("two\nlines".to_string())),
            "\"two\\nlines\""
        );
    }

    #[test]
    fn test_data_point_format() {
        let mut tags = BTreeMap::new();
        tags.insert("label".to_string(), "Front door".to_string());
        tags.insert("address".to_string(), TEST_ADDRESS.to_string());

        let mut fields = BTreeMap::new();
        fields.insert("rssi".to_string(), FieldValue::Integer(-60));
        fields.insert("distance".to_string(), FieldValue::Float(0.5));

        let data_point = DataPoint {
            measurement: "test".to_string(),
            tag_set: tags,
            field_set: fields,
            timestamp: Some(timestamp()),
        };

        assert_eq!(
            format!("{}", data_point),
            "test,address=AA:BB:CC:DD:EE:FF,label=Front\\ door distance=0.5,rssi=-60i 1000000000000000000"
        );
    }

    #[test]
    fn test_data_point_without_timestamp() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "value".to_string(),
            FieldValue::String("string,value".to_string()),
        );

        let data_point = DataPoint {
            measurement: "test".to_string(),
            tag_set: BTreeMap::new(),
            field_set: fields,
            timestamp: None,
        };
        assert_eq!(format!("{}", data_point), "test value=\"string,value\"");
    }

    #[test]
    fn test_escape_tag() {
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");
        assert_eq!(escape_tag("plain"), "plain");
    }

    #[test]
    fn test_presence_line_unassociated() {
        let mut tracker = PresenceTracker::new();
        tracker.add_device(identity(TEST_ADDRESS, UUID, 1, 2), -60, None);
        let formatter = InfluxDbFormatter::new("beacon_presence".to_string());

        let line = formatter.format_presence(&PresenceRow {
            observation: tracker.item(0).unwrap(),
            association: None,
            timestamp: timestamp(),
        });

        assert!(line.starts_with(
            "beacon_presence,address=AA:BB:CC:DD:EE:FF,major=1,minor=2,uuid=E2C56DB5-DFFB-48D2-B060-D0F5A71096E0 "
        ));
        assert!(line.contains("rssi=-60i"));
        assert!(line.contains("reference_level=58i"));
        assert!(line.contains("threshold=3i"));
        assert!(line.contains("distance="));
        assert!(!line.contains("label="));
        assert!(!line.contains("value="));
        assert!(line.ends_with(" 1000000000000000000"));
    }

    #[test]
    fn test_presence_line_associated_with_name() {
        let mut tracker = PresenceTracker::new();
        tracker.add_device(
            identity(TEST_ADDRESS, UUID, 1, 2),
            -60,
            Some("Tag 7".to_string()),
        );
        let record = record("Front door", "https://example.org/door");
        let formatter = InfluxDbFormatter::new("beacon_presence".to_string());

        let line = formatter.format_presence(&PresenceRow {
            observation: tracker.item(0).unwrap(),
            association: Some(&record),
            timestamp: timestamp(),
        });

        assert!(line.contains(",label=Front\\ door"));
        assert!(line.contains(",name=Tag\\ 7"));
        assert!(line.contains("value=\"https://example.org/door\""));
    }

    #[test]
    fn test_presence_line_skips_empty_tags() {
        let mut tracker = PresenceTracker::new();
        tracker.add_device(
            identity(TEST_ADDRESS, UUID, 1, 2),
            -60,
            Some(String::new()),
        );
        let record = record("", "v");
        let formatter = InfluxDbFormatter::new("beacon_presence".to_string());

        let line = formatter.format_presence(&PresenceRow {
            observation: tracker.item(0).unwrap(),
            association: Some(&record),
            timestamp: timestamp(),
        });

        assert!(!line.contains("label="));
        assert!(!line.contains("name="));
        assert!(line.starts_with(
            "beacon_presence,address=AA:BB:CC:DD:EE:FF,major=1,minor=2,uuid=E2C56DB5-DFFB-48D2-B060-D0F5A71096E0 "
        ));
        assert!(line.contains("value=\"v\""));
    }

    #[test]
    fn test_presence_line_stays_on_one_line() {
        let mut tracker = PresenceTracker::new();
        tracker.add_device(
            identity(TEST_ADDRESS, UUID, 1, 2),
            -60,
            Some("Tag\r\n7".to_string()),
        );
        let record = record("Front\ndoor", "first\nsecond");
        let formatter = InfluxDbFormatter::new("beacon_presence".to_string());

        let line = formatter.format_presence(&PresenceRow {
            observation: tracker.item(0).unwrap(),
            association: Some(&record),
            timestamp: timestamp(),
        });

        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
        assert!(line.contains(",label=Front\\ door"));
        assert!(line.contains(",name=Tag\\ \\ 7"));
        assert!(line.contains("value=\"first\\nsecond\""));
    }

    #[test]
    fn test_presence_line_omits_unknown_distance() {
        let mut tracker = PresenceTracker::new();
        let mut uncalibrated = identity(TEST_ADDRESS, UUID, 1, 2);
        uncalibrated.reference_level = REFERENCE_UNKNOWN;
        tracker.add_device(uncalibrated, -60, None);
        let formatter = InfluxDbFormatter::new("beacon_presence".to_string());

        let line = formatter.format_presence(&PresenceRow {
            observation: tracker.item(0).unwrap(),
            association: None,
            timestamp: timestamp(),
        });

        assert!(!line.contains("distance="));
        assert!(line.contains("reference_level=255i"));
    }

    #[test]
    fn test_alert_line() {
        let record = record("Office", "v");
        let alert = Alert {
            id: 4,
            address: TEST_ADDRESS.to_string(),
            kind: AlertKind::Raised,
        };
        let formatter = InfluxDbFormatter::new("beacon_presence".to_string());

        let line = formatter.format_alert(&AlertRow {
            alert: &alert,
            association: &record,
            distance: f64::INFINITY,
            timestamp: timestamp(),
        });

        assert_eq!(
            line,
            "beacon_presence_alert,address=AA:BB:CC:DD:EE:FF,kind=raised,label=Office id=4i,value=\"v\" 1000000000000000000"
        );
    }

    #[test]
    fn test_alert_line_without_label() {
        let record = record("", "v");
        let alert = Alert {
            id: u32::MAX,
            address: TEST_ADDRESS.to_string(),
            kind: AlertKind::Updated,
        };
        let formatter = InfluxDbFormatter::new("beacon_presence".to_string());

        let line = formatter.format_alert(&AlertRow {
            alert: &alert,
            association: &record,
            distance: 1.5,
            timestamp: timestamp(),
        });

        assert_eq!(
            line,
            "beacon_presence_alert,address=AA:BB:CC:DD:EE:FF,kind=updated distance=1.5,id=4294967295i,value=\"v\" 1000000000000000000"
        );
    }
}
