//! Fuzz test for configuration file parsing
//!
//! Tests that arbitrary TOML input doesn't cause panics or crashes when
//! parsed as QuantumGate settings (§6), and that anything that does parse
//! passes (or cleanly fails) `Settings::validate`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quantumgate_core::Settings;

fuzz_target!(|data: &[u8]| {
    // Try parsing as UTF-8 TOML
    if let Ok(s) = std::str::from_utf8(data) {
        // Attempt to parse as TOML
        let _: Result<toml::Value, _> = toml::from_str(s);

        // Attempt to deserialize as Settings - shouldn't panic even on
        // malformed or adversarial input.
        if let Ok(settings) = toml::from_str::<Settings>(s) {
            let _ = settings.validate();
        }
    }
});
