//! Cross-cutting spec and status types shared by all operator CRs.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tunables every operand spec carries: scheduling hints, resource requests
/// and extra labels stamped onto child objects.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfig {
    /// Extra labels merged onto every managed child object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Resource requests/limits for the operand containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Pod affinity rules for the operand workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations for the operand workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Node selector for the operand workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

/// Conditions block embedded in every CR status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalStatus {
    /// Latest observed conditions of the resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Narrow capability the aggregator needs: read a CR's conditions without
/// knowing its concrete type.
pub trait HasConditionalStatus {
    /// The conditions block, if a status has been written at all.
    fn conditional_status(&self) -> Option<&ConditionalStatus>;
}

/// Per-operand summary published on the top-level CR status.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandStatus {
    /// Kind of the operand CR
    pub kind: String,

    /// Name of the operand CR (always "cluster")
    pub name: String,

    /// String-encoded readiness flag ("true"/"false")
    pub ready: String,

    /// Human-readable summary of the operand state
    #[serde(default)]
    pub message: String,

    /// Pruned condition set (create-only + failure conditions only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Interpret a string-encoded boolean field ("true"/"false").
///
/// Several CR fields keep the string encoding for API compatibility with
/// enum-validated `"true"`/`"false"` values.
pub fn string_to_bool(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("true")
}

/// Parse a Go-style duration string (e.g. "24h", "1h30m", "90s").
///
/// Accepts combinations of hours (h), minutes (m) and seconds (s) in that
/// conventional order; each unit may appear at most once.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let mut total_secs: u64 = 0;
    let mut num = String::new();
    let mut seen_unit = false;

    for c in s.chars() {
        if c.is_ascii_digit() {
            num.push(c);
            continue;
        }
        if num.is_empty() {
            return Err(format!("invalid duration '{s}': unit without a number"));
        }
        let value: u64 = num
            .parse()
            .map_err(|_| format!("invalid number in duration '{s}'"))?;
        let secs = match c {
            'h' => value.checked_mul(3600),
            'm' => value.checked_mul(60),
            's' => Some(value),
            other => return Err(format!("invalid duration unit '{other}' in '{s}'")),
        }
        .ok_or_else(|| format!("duration '{s}' overflows"))?;
        total_secs = total_secs
            .checked_add(secs)
            .ok_or_else(|| format!("duration '{s}' overflows"))?;
        num.clear();
        seen_unit = true;
    }

    if !num.is_empty() {
        return Err(format!("missing unit suffix (h/m/s) in duration '{s}'"));
    }
    if !seen_unit {
        return Err(format!("no duration units found in '{s}'"));
    }
    Ok(Duration::from_secs(total_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_to_bool_accepts_conventional_encodings() {
        assert!(string_to_bool("true"));
        assert!(string_to_bool("True"));
        assert!(string_to_bool(" true "));
        assert!(!string_to_bool("false"));
        assert!(!string_to_bool(""));
        assert!(!string_to_bool("yes"));
    }

    #[test]
    fn parse_duration_handles_single_units() {
        assert_eq!(parse_duration("24h"), Ok(Duration::from_secs(86400)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("90s"), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn parse_duration_handles_combinations() {
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1h30m15s"), Ok(Duration::from_secs(5415)));
    }

    #[test]
    fn parse_duration_rejects_malformed_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("ten minutes").is_err());
    }
}
