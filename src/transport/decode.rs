use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::errors::Error;

use super::TransportResponse;

/// Turns a successful response into the caller's model type.
pub trait ResponseDecoder: Send + Sync + 'static {
    type Output: Send + 'static;

    fn decode(&self, response: &TransportResponse) -> Result<Self::Output, Error>;
}

pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Send + 'static> ResponseDecoder for JsonDecoder<T> {
    type Output = T;

    fn decode(&self, response: &TransportResponse) -> Result<T, Error> {
        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextDecoder;

impl ResponseDecoder for TextDecoder {
    type Output = String;

    fn decode(&self, response: &TransportResponse) -> Result<String, Error> {
        String::from_utf8(response.body.clone())
            .map_err(|e| Error::Decode(format!("response is not UTF-8: {e}")))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BytesDecoder;

impl ResponseDecoder for BytesDecoder {
    type Output = Vec<u8>;

    fn decode(&self, response: &TransportResponse) -> Result<Vec<u8>, Error> {
        Ok(response.body.clone())
    }
}

/// Ignores the body; only the status matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyDecoder;

impl ResponseDecoder for EmptyDecoder {
    type Output = ();

    fn decode(&self, _response: &TransportResponse) -> Result<(), Error> {
        Ok(())
    }
}
