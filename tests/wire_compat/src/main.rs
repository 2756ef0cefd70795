fn main() {
    println!("Run `cargo test -p wire-compat` to check the backend and state file formats.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use partwise_protocol::{
        CompleteRequest, CompleteResponse, InitiateRequest, InitiateResponse, PartUrlResponse,
        UploadStatus,
    };
    use partwise_uploader::{PersistedState, STATE_VERSION, UploaderConfig};

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

    /// Deserializes a fixture, re-serializes it, and compares the JSON values.
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

    // --- Backend API ---

    #[test]
    fn fixture_initiate_request() {
        let req = roundtrip_test::<InitiateRequest>("initiate_request.json");
        assert_eq!(req.file_name, "holiday.mp4");
    }

    #[test]
    fn fixture_initiate_response() {
        let resp = roundtrip_test::<InitiateResponse>("initiate_response.json");
        assert_eq!(resp.chunk_size, Some(10 * 1024 * 1024));
        assert_eq!(resp.already_uploaded_parts, vec![1, 2]);
        assert_eq!(resp.parts_etags.len(), 2);
        assert!(resp.rejection(25 * 1024 * 1024).is_none());
    }

    #[test]
    fn fixture_initiate_response_rejected() {
        let resp = roundtrip_test::<InitiateResponse>("initiate_response_rejected.json");
        assert_eq!(resp.rejection(1).as_deref(), Some("storage quota exceeded"));
    }

    #[test]
    fn fixture_resume_plan_from_initiate_response() {
        let resp: InitiateResponse =
            serde_json::from_value(load_fixture("initiate_response.json")).unwrap();
        let chunks = partwise_transfer::plan(
            26_214_400,
            resp.chunk_size.unwrap_or(partwise_transfer::DEFAULT_CHUNK_SIZE),
            &resp.already_uploaded_parts,
            &resp.parts_etags,
        );
        let uploaded: Vec<bool> = chunks.iter().map(|c| c.uploaded).collect();
        assert_eq!(uploaded, vec![true, true, false]);
        assert_eq!(partwise_transfer::uploaded_bytes(&chunks), 20_971_520);
    }

    #[test]
    fn fixture_part_url_response() {
        let resp = roundtrip_test::<PartUrlResponse>("part_url_response.json");
        assert!(resp.url.contains("partNumber=3"));
    }

    #[test]
    fn fixture_complete_request() {
        let req = roundtrip_test::<CompleteRequest>("complete_request.json");
        let numbers: Vec<u32> = req.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn fixture_complete_response() {
        roundtrip_test::<CompleteResponse>("complete_response.json");
    }

    // --- Local files ---

    #[test]
    fn fixture_upload_state() {
        let state = roundtrip_test::<PersistedState>("upload_state.json");
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.uploads.len(), 2);
        assert_eq!(state.uploads[0].status, UploadStatus::Paused);
        assert_eq!(state.uploads[1].upload_id, None);
    }

    #[test]
    fn fixture_upload_state_restores_awaiting_file() {
        let state: PersistedState =
            serde_json::from_value(load_fixture("upload_state.json")).unwrap();
        let records = state.into_records();
        assert!(
            records
                .iter()
                .all(|r| r.status == UploadStatus::AwaitingFile && !r.has_file())
        );
        assert_eq!(records[0].uploaded_bytes, 20_971_520);
        assert_eq!(records[1].error.as_deref(), Some("HTTP 500: internal error"));
    }

    #[test]
    fn fixture_uploader_config() {
        let config = roundtrip_test::<UploaderConfig>("uploader_config.json");
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.retry.max_attempts(), 7);
        assert!(config.part_checksums);
    }
}
