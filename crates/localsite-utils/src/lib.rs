//! Host interaction for localsite.
//!
//! Everything that shells out or depends on the machine it runs on lives
//! here, behind [`command::CommandRunner`] so it can be exercised with a
//! scripted runner in tests.

/// Certificate issuance through mkcert.
pub mod cert;
/// External command execution.
pub mod command;
/// The user who invoked localsite (through sudo or directly).
pub mod identity;
/// Document root ownership and ACLs.
pub mod permissions;
/// PHP and PHP-FPM discovery.
pub mod php;
/// Host detection and per-OS behaviour.
pub mod platform;
/// Web server site activation.
pub mod service;
