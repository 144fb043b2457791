use thiserror::Error;

/// Errors from the storage layer: SQLite, the media store, queue payload
/// codecs, and ident parsing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// A queue payload or kv-store value failed to encode or decode.
    #[error("payload codec: {0}")]
    Payload(#[from] serde_json::Error),

    /// A foreign catalog id with no mapping row yet. Attribution passes
    /// treat this as "park and retry": the producing pass has not run.
    #[error("no {table} row maps foreign id {foreign_id}")]
    Unmapped {
        table: &'static str,
        foreign_id: String,
    },

    /// Not a `tr`/`al`/`ar` prefix followed by a decimal key.
    #[error("malformed ident {0:?}")]
    MalformedIdent(String),

    /// Not a sharded hex ref minted by the media store.
    #[error("malformed media ref {0:?}")]
    MalformedRef(String),

    /// A seed line decoded to a payload belonging to a different pass
    /// than the file it came from.
    #[error("seed payload is for {found}, expected {expected}")]
    SeedMismatch { found: String, expected: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_names_the_mapping_table() {
        let e = Error::Unmapped {
            table: "spotify_track",
            foreign_id: "6rqhFgbbKwnb9MLmUQDhG6".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("spotify_track"), "{msg}");
        assert!(msg.contains("6rqhFgbbKwnb9MLmUQDhG6"), "{msg}");
    }

    #[test]
    fn payload_decode_failures_convert() {
        let bad: std::result::Result<i64, _> = serde_json::from_str("{");
        let e: Error = bad.unwrap_err().into();
        assert!(matches!(e, Error::Payload(_)));
    }
}
