//! Concrete collaborator implementations for the binary: a prompter
//! that asks on stdin. Peer verification and self-IP detection stay on
//! the always-trust / no-op defaults from `meshxfer-core`, since the
//! overlay-network logic they'd normally delegate to is out of scope.

use meshxfer_core::Prompter;
use std::io::Write;

pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn ask(&self, question: &str) -> bool {
        print!("{question} [y/N] ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}
