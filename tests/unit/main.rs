mod config_file;
mod fingerprint;
mod jitter;
mod retry_policy;
