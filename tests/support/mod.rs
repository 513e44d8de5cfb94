#![allow(dead_code)]

pub mod helpers;
pub mod mock_agent;
pub mod mock_target;
