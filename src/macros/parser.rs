use std::ops::Range;

use regex::Regex;

/// Device operation a macro requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroAction {
    On,
    Off,
    Cycle,
}

/// One parsed macro occurrence
///
/// Transient: exists only while one message is being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroMatch {
    /// Requested operation
    pub action: MacroAction,
    /// Device alias, trimmed
    pub device_name: String,
    /// Duration in seconds; meaningful only for `Cycle`, where absence means
    /// the configured default
    pub duration: Option<u64>,
    /// Byte range of the full macro literal in the original text
    pub span: Range<usize>,
}

/// Recognizes `{{tplink-on:Name}}`, `{{tplink-off:Name}}`, and
/// `{{tplink-cycle:Name:Seconds}}`
///
/// The action keyword matches case-insensitively; `Name` is any run of
/// characters excluding `:` and `}`.
pub struct MacroParser {
    pattern: Regex,
}

impl MacroParser {
    /// Creates a parser
    pub fn new() -> Self {
        // The pattern is a literal; compilation cannot fail.
        let pattern = Regex::new(r"(?i)\{\{tplink-(on|off|cycle):([^:}]+)(?::([0-9]+))?\}\}")
            .expect("macro pattern is valid");
        MacroParser { pattern }
    }

    /// Finds every macro in `text`, in order of appearance
    pub fn find_all(&self, text: &str) -> Vec<MacroMatch> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let full = caps.get(0)?;
                let action = match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
                    "on" => MacroAction::On,
                    "off" => MacroAction::Off,
                    _ => MacroAction::Cycle,
                };
                // A seconds field is valid only on cycle; a seconds value
                // that does not fit u64 is malformed. Either way the literal
                // is not a macro and stays in the text untouched.
                let duration = match caps.get(3) {
                    Some(_) if action != MacroAction::Cycle => return None,
                    Some(d) => Some(d.as_str().parse().ok()?),
                    None => None,
                };
                Some(MacroMatch {
                    action,
                    device_name: caps.get(2)?.as_str().trim().to_string(),
                    duration,
                    span: full.range(),
                })
            })
            .collect()
    }
}

impl Default for MacroParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_all_three_actions() {
        let parser = MacroParser::new();
        let text = "a {{tplink-on:Lamp}} b {{tplink-off:Fan}} c {{tplink-cycle:Pump:45}}";
        let matches = parser.find_all(text);
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].action, MacroAction::On);
        assert_eq!(matches[0].device_name, "Lamp");
        assert_eq!(matches[1].action, MacroAction::Off);
        assert_eq!(matches[2].action, MacroAction::Cycle);
        assert_eq!(matches[2].duration, Some(45));
        assert_eq!(&text[matches[0].span.clone()], "{{tplink-on:Lamp}}");
    }

    #[test]
    fn test_action_keyword_is_case_insensitive() {
        let parser = MacroParser::new();
        let matches = parser.find_all("{{TPLink-ON:Lamp}}");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].action, MacroAction::On);
        assert_eq!(matches[0].device_name, "Lamp");
    }

    #[test]
    fn test_cycle_seconds_are_optional() {
        let parser = MacroParser::new();
        let matches = parser.find_all("{{tplink-cycle:Pump}}");
        assert_eq!(matches[0].action, MacroAction::Cycle);
        assert_eq!(matches[0].duration, None);
    }

    #[test]
    fn test_name_is_trimmed() {
        let parser = MacroParser::new();
        let matches = parser.find_all("{{tplink-on: Lamp }}");
        assert_eq!(matches[0].device_name, "Lamp");
    }

    #[test]
    fn test_ignores_non_macros() {
        let parser = MacroParser::new();
        assert!(parser.find_all("{{tplink-on}}").is_empty());
        assert!(parser.find_all("{{hue-on:Lamp}}").is_empty());
        assert!(parser.find_all("tplink-on:Lamp").is_empty());
        assert!(parser.find_all("plain text").is_empty());
    }

    #[test]
    fn test_seconds_on_switch_actions_is_not_a_macro() {
        let parser = MacroParser::new();
        assert!(parser.find_all("{{tplink-on:Lamp:5}}").is_empty());
        assert!(parser.find_all("{{tplink-off:Fan:10}}").is_empty());
    }

    #[test]
    fn test_oversized_seconds_is_not_a_macro() {
        // Does not fit u64; must not fall back to the default duration.
        let parser = MacroParser::new();
        assert!(parser
            .find_all("{{tplink-cycle:Pump:99999999999999999999999}}")
            .is_empty());
    }

    #[test]
    fn test_matches_in_order_of_appearance() {
        let parser = MacroParser::new();
        let matches = parser.find_all("{{tplink-off:B}} then {{tplink-on:A}}");
        assert_eq!(matches[0].device_name, "B");
        assert_eq!(matches[1].device_name, "A");
        assert!(matches[0].span.end <= matches[1].span.start);
    }
}
