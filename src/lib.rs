//! Steward: a community moderation bot.
//!
//! Inbound gateway events run through listener pipelines ([`pipeline`], [`listeners`]),
//! slash commands through the [`commands`] dispatcher, and account verification
//! through [`verification`] with the HTTP endpoints in [`web`].

pub mod activity;
pub mod audit;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod database;
pub mod discord;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod listeners;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod text;
pub mod threads;
pub mod verification;
pub mod web;

#[cfg(test)]
pub mod testing;
