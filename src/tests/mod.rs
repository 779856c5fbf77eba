pub(crate) mod retry_backoff;
