pub mod attributor;
pub mod bot;
pub mod commands;
pub mod diagnostics;
pub mod events;
pub mod grant;
pub mod platform;
pub mod rest;
pub mod scheduler;
pub mod settings;
#[cfg(test)]
pub mod testing;
pub mod tracker;
pub mod validation;
