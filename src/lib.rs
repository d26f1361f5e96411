// Startup configuration (TOML tunables + env secrets)
pub mod config;

// Encrypted credential storage
pub mod credentials;

// OAuth token exchange client
pub mod oauth;

// Guild membership replay client
pub mod membership;

// Token lifecycle orchestration (capture / renew / replay)
pub mod lifecycle;

// HTTP API
pub mod api;
