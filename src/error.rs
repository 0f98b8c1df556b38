use thiserror::Error;

/// Error taxonomy for Nettrace decoding.
///
/// Every fallible operation in this crate returns one of these variants. `SymbolDomain` is the
/// only soft-failure kind (see `symbol::SymbolTable::add_process_symbol`); everything else is
/// fatal and aborts the parse.
#[derive(Error, Debug)]
pub enum NettraceError {
    #[error("bad magic: expected \"Nettrace\" + \"!FastSerialization.1\", found {found:?}")]
    BadMagic { found: Vec<u8> },

    #[error("unexpected end of input at byte {position}")]
    UnexpectedEnd { position: u64 },

    #[error("structural violation at byte {position}: {message}")]
    StructuralViolation { position: u64, message: String },

    #[error("no schema registered for metadata-id {metadata_id}")]
    MissingSchema { metadata_id: u32 },

    #[error("unknown field type code {code}")]
    SchemaTypeCode { code: i32 },

    #[error("payload shape error: {message}")]
    PayloadShape { message: String },

    #[error("ProcessSymbol referenced unknown mapping-id {mapping_id}")]
    SymbolDomain { mapping_id: u64 },
}

impl From<std::io::Error> for NettraceError {
    fn from(_: std::io::Error) -> Self {
        // Our readers only ever see `UnexpectedEof` or transient I/O failures while pulling
        // primitives off the stream; both are modeled as UnexpectedEnd since this crate does not
        // materialize a partial `Trace` either way.
        NettraceError::UnexpectedEnd { position: 0 }
    }
}

impl From<binrw::Error> for NettraceError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(_) => NettraceError::UnexpectedEnd { position: 0 },
            other => NettraceError::PayloadShape {
                message: other.to_string(),
            },
        }
    }
}
