use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const DEFAULT_CALLSIGN_TEMPLATE: &str = "{department}{callsign1} - {callsign2}{division}";

static BRACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[{}]").expect("callsign brace pattern to compile"));

/// Values a callsign template can refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallsignParts {
    pub department: Option<String>,
    pub callsign1: Option<String>,
    pub callsign2: Option<String>,
    pub division: Option<String>,
    pub incremental: Option<i64>,
}

impl CallsignParts {
    fn lookup(&self, key: &str) -> Option<Option<String>> {
        let value = match key {
            "department" => self.department.clone(),
            "callsign1" => self.callsign1.clone(),
            "callsign2" => self.callsign2.clone(),
            "division" => self.division.clone(),
            "incremental" => self.incremental.map(|n| n.to_string()),
            _ => return None,
        };
        Some(value)
    }
}

/// Renders `template` for a unit.
///
/// The template is split on braces; a segment naming a known placeholder is
/// replaced by its value (empty when the unit has none), anything else is
/// copied through as literal text.
pub fn render_callsign(template: &str, parts: &CallsignParts) -> String {
    BRACES
        .split(template)
        .map(|segment| match parts.lookup(segment) {
            Some(value) => value.unwrap_or_default(),
            None => segment.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> CallsignParts {
        CallsignParts {
            department: Some("L".into()),
            callsign1: Some("1".into()),
            callsign2: Some("12".into()),
            division: Some("A".into()),
            incremental: Some(7),
        }
    }

    #[test]
    fn renders_default_template() {
        assert_eq!(render_callsign(DEFAULT_CALLSIGN_TEMPLATE, &parts()), "L1 - 12A");
    }

    #[test]
    fn missing_values_render_empty() {
        let parts = CallsignParts {
            callsign1: Some("4".into()),
            callsign2: Some("20".into()),
            ..CallsignParts::default()
        };
        assert_eq!(render_callsign(DEFAULT_CALLSIGN_TEMPLATE, &parts), "4 - 20");
    }

    #[test]
    fn unknown_placeholders_stay_as_text() {
        assert_eq!(
            render_callsign("{callsign1}-{unit}#{incremental}", &parts()),
            "1-unit#7"
        );
    }

    #[test]
    fn template_without_placeholders_is_literal() {
        assert_eq!(render_callsign("Dispatch", &parts()), "Dispatch");
    }
}
