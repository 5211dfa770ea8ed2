#![doc = include_str!("../../README.md")]

pub mod arm_config;
pub mod arm_controller;
pub mod arm_driver;
pub mod command;
pub mod command_queue;
pub mod distance_sensor;
pub mod hardware;
pub mod motion_planner;
pub mod motor_driver;
