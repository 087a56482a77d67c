use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(msg)
        .map_err(|e| DriverError::Codec(format!("Serialization failed: {}", e)))?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(DriverError::MessageTooLarge);
    }
    Ok(payload)
}

pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(DriverError::MessageTooLarge);
    }
    rmp_serde::from_slice(data)
        .map_err(|e| DriverError::Codec(format!("Deserialization failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::protocol::{QueryType, Request, Response, ServerError, ServerErrorCode};

    #[test]
    fn test_request_survives_codec() {
        let request = Request::Query {
            tx_id: "tx-1".to_string(),
            query_type: QueryType::Get,
            query: "match $x isa person;".to_string(),
            options: Options::new().infer(true).prefetch_size(8),
        };

        let bytes = encode_message(&request).unwrap();
        let decoded: Request = decode_message(&bytes).unwrap();

        match decoded {
            Request::Query {
                tx_id,
                query_type,
                query,
                options,
            } => {
                assert_eq!(tx_id, "tx-1");
                assert_eq!(query_type, QueryType::Get);
                assert_eq!(query, "match $x isa person;");
                assert!(options.infer_enabled());
                assert_eq!(options.prefetch_size_or_default(), 8);
            }
            other => panic!("Unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_error_response_keeps_code() {
        let response = Response::error(ServerError::new(
            ServerErrorCode::DatabaseNotFound,
            "Database 'x' does not exist",
        ));

        let bytes = encode_message(&response).unwrap();
        match decode_message::<Response>(&bytes).unwrap() {
            Response::Error { error } => {
                assert_eq!(error.code, ServerErrorCode::DatabaseNotFound);
                assert!(error.message.contains("'x'"));
            }
            other => panic!("Expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        let err = decode_message::<Request>(&[0xc1, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, DriverError::Codec(_)));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let data = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let err = decode_message::<Request>(&data).unwrap_err();
        assert_eq!(err, DriverError::MessageTooLarge);
    }
}
