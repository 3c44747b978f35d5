#![allow(dead_code)]

pub mod scripted;
pub mod socket_guard;
