// Expiry evaluation with a safety buffer
pub mod policy;

// Encrypted token persistence
pub mod credentials;

// Provider token endpoint and sign-in state
pub mod oauth;

// Credential lifecycle and single-flight refresh
pub mod manager;

// Project validation and links
pub mod project;

// Proactive refresh timers
pub mod scheduler;

// Sign-in, sign-out and token requests
pub mod session;

// Bearer extraction
pub mod auth;

// HTTP APIs
pub mod api;

// Configuration
pub mod config;
