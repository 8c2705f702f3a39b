#![forbid(unsafe_code)]

pub mod auth_client;
pub mod bot_service;
pub mod chat;
pub mod controllers;
pub mod health;
pub mod relay;

#[cfg(test)]
mod bot_service_tests;
#[cfg(test)]
mod relay_tests;
