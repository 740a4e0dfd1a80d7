// Interpreter tunables, loadable from a RON file by the driver.

use ron::de::from_reader;
use serde::Deserialize;
use std::fs::File;

use crate::heap::INITIAL_CAPACITY;

#[derive(Deserialize, Debug, Copy, Clone)]
pub struct Tunables {
    // Initial capacity of the live-cell registry.
    pub registry_capacity: usize,
    // Initial capacity of each frame's operand stack.
    pub stack_capacity: usize,
    // Have the driver report the cells swept after each input.
    pub trace_gc: bool,
}

impl Default for Tunables {
    fn default() -> Tunables {
        Tunables {
            registry_capacity: INITIAL_CAPACITY,
            stack_capacity: INITIAL_CAPACITY,
            trace_gc: false,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(String),
    ParseError(String),
}

pub fn load(path: String) -> Result<Tunables, ConfigError> {
    let reader = File::open(&path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
    from_reader(reader).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_builtin_constants() {
        let t = Tunables::default();
        assert_eq!(t.registry_capacity, INITIAL_CAPACITY);
        assert_eq!(t.stack_capacity, INITIAL_CAPACITY);
        assert!(!t.trace_gc);
    }

    #[test]
    fn test_parse_ron() {
        let t: Tunables = ron::de::from_str(
            "(registry_capacity: 64, stack_capacity: 16, trace_gc: true)",
        )
        .unwrap();
        assert_eq!(t.registry_capacity, 64);
        assert_eq!(t.stack_capacity, 16);
        assert!(t.trace_gc);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        match load("no-such-file.ron".to_string()) {
            Err(ConfigError::ReadError(_)) => {}
            other => panic!("expected read error, got {:?}", other),
        }
    }
}
