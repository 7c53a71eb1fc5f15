fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use reelhub_protocol::constants::{
        ROUTE_CHUNK, ROUTE_FINALIZE, ROUTE_HEALTH, ROUTE_INIT, ROUTE_STATUS, fields,
    };
    use reelhub_protocol::{
        ChunkAccepted, ErrorCode, ErrorResponse, FinalizeRequest, FinalizeResponse,
        InitUploadRequest, InitUploadResponse, StatusRequest, StatusResponse,
    };
    use reelhub_session_store::UploadSession;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values. Returns the parsed value for further checks.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
        parsed
    }

    // --- Request bodies ---

    #[test]
    fn fixture_init_upload_request() {
        let req: InitUploadRequest = roundtrip_test("init_upload_request.json");
        assert_eq!(req.total_chunks, Some(1536));
        assert_eq!(req.file_size, 3 * 1024 * 1024 * 1024);
    }

    #[test]
    fn init_request_total_chunks_optional() {
        let json = r#"{"fileName":"a.mp4","fileSize":10,"chunkSize":5}"#;
        let req: InitUploadRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.total_chunks, None);
        assert!(!serde_json::to_string(&req).unwrap().contains("totalChunks"));
    }

    #[test]
    fn fixture_status_request() {
        let _: StatusRequest = roundtrip_test("status_request.json");
    }

    #[test]
    fn fixture_finalize_request() {
        let _: FinalizeRequest = roundtrip_test("finalize_request.json");
    }

    // --- Response bodies ---

    #[test]
    fn fixture_init_upload_response() {
        let resp: InitUploadResponse = roundtrip_test("init_upload_response.json");
        assert_eq!(resp.chunk_size, 2 * 1024 * 1024);
    }

    #[test]
    fn fixture_status_response() {
        let resp: StatusResponse = roundtrip_test("status_response.json");
        assert!(resp.exists);
        assert_eq!(resp.chunk_size, 5 * 1024 * 1024);
        assert_eq!(resp.received_chunks, vec![0, 2]);
        assert_eq!(resp.missing_chunks, vec![1]);
    }

    #[test]
    fn fixture_status_not_found() {
        let resp: StatusResponse = roundtrip_test("status_not_found.json");
        assert_eq!(resp, StatusResponse::not_found("gone"));
    }

    #[test]
    fn fixture_chunk_accepted() {
        let _: ChunkAccepted = roundtrip_test("chunk_accepted.json");
    }

    #[test]
    fn fixture_finalize_response() {
        let _: FinalizeResponse = roundtrip_test("finalize_response.json");
    }

    #[test]
    fn fixture_error_incomplete_upload() {
        let err: ErrorResponse = roundtrip_test("error_incomplete_upload.json");
        assert_eq!(err.code, ErrorCode::IncompleteUpload);
        assert_eq!(err.missing_chunks, Some(vec![1]));
    }

    #[test]
    fn fixture_error_unknown_session() {
        let err: ErrorResponse = roundtrip_test("error_unknown_session.json");
        assert_eq!(err.code, ErrorCode::UnknownSession);
        assert_eq!(err.missing_chunks, None);
    }

    #[test]
    fn error_codes_serialize_as_wire_names() {
        let all = [
            ErrorCode::UnknownSession,
            ErrorCode::IndexOutOfRange,
            ErrorCode::InvalidSize,
            ErrorCode::InvalidFileName,
            ErrorCode::ChecksumMismatch,
            ErrorCode::ChunkTooLarge,
            ErrorCode::BadRequest,
            ErrorCode::IncompleteUpload,
            ErrorCode::FinalizeInProgress,
            ErrorCode::RemoteStoreError,
            ErrorCode::WriteFailure,
            ErrorCode::InternalError,
        ];
        for code in all {
            let json = serde_json::to_value(code).unwrap();
            assert_eq!(json, serde_json::json!(code.as_str()), "{code:?}");
        }
    }

    // --- On-disk session metadata ---

    #[test]
    fn fixture_session_metadata() {
        let session: UploadSession = roundtrip_test("session_metadata.json");
        assert_eq!(session.received_count(), 2);
        assert_eq!(session.missing_chunks(), vec![1]);
        assert!(!session.is_complete());
    }

    // --- Routes and multipart fields ---

    #[test]
    fn routes_are_stable() {
        assert_eq!(ROUTE_INIT, "/upload/init");
        assert_eq!(ROUTE_STATUS, "/upload/status");
        assert_eq!(ROUTE_CHUNK, "/upload/chunk");
        assert_eq!(ROUTE_FINALIZE, "/upload/finalize");
        assert_eq!(ROUTE_HEALTH, "/health");
    }

    #[test]
    fn multipart_field_names_are_stable() {
        assert_eq!(fields::SESSION_ID, "sessionId");
        assert_eq!(fields::INDEX, "index");
        assert_eq!(fields::TOTAL_CHUNKS, "totalChunks");
        assert_eq!(fields::CHECKSUM, "checksum");
        assert_eq!(fields::CHUNK, "chunk");
    }
}
