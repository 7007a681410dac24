//! Fuzz test for CLI argument parsing.
//!
//! Tests that arbitrary CLI arguments don't cause panics or crashes when fed
//! to the value parsers the `quantumgate` binary's subcommands rely on
//! (listen/connect addresses, keygen output paths).

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert fuzzer input to string arguments
    if let Ok(s) = std::str::from_utf8(data) {
        let args: Vec<&str> = s.split_whitespace().collect();

        if args.is_empty() {
            return;
        }

        // Mirror the `quantumgate keygen|listen|connect` subcommands'
        // argument shapes (`quantumgate-cli/src/main.rs`).
        match args[0] {
            "keygen" => {
                let _ = args.get(1).map(|p| p.parse::<std::path::PathBuf>());
            }
            "listen" => {
                let _ = args.get(1).map(|b| b.parse::<std::net::SocketAddr>());
            }
            "connect" => {
                let _ = args.get(1).map(|a| a.parse::<std::net::SocketAddr>());
            }
            _ => {}
        }

        // Exercise the same value parsers against every token.
        for arg in &args {
            let _ = arg.parse::<u16>();
            let _ = arg.parse::<std::net::SocketAddr>();
            let _ = arg.parse::<bool>();
            if arg.len() == 64 {
                let _ = hex::decode(arg);
            }
        }
    }
});
