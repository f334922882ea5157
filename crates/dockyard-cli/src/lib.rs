//! Library half of the dockyard binary, so commands can be tested directly

pub mod commands;
