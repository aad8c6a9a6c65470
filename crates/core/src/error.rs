/// Top-level error type. All public engine operations return this.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Invalid package document: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid position address: {0}")]
    Address(#[from] AddressParseError),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Spine index {index} out of range (spine has {len} items)")]
    Range { index: usize, len: usize },

    #[error("Decryption error: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SecurityError> for EngineError {
    fn from(e: SecurityError) -> Self {
        EngineError::Container(ContainerError::Security(e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("ZIP bomb detected: decompression ratio {ratio}:1 exceeds limit {limit}:1")]
    ZipBomb { ratio: u64, limit: u64 },

    #[error("Path traversal detected in archive entry: {path}")]
    PathTraversal { path: String },

    #[error("Archive contains {count} files, exceeding limit of {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("Resource {name} is {size_mb}MB, exceeding limit of {limit_mb}MB")]
    OversizedResource {
        name: String,
        size_mb: u64,
        limit_mb: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Not a valid ZIP archive: {0}")]
    InvalidArchive(String),

    #[error("Missing required entry: {0}")]
    MissingEntry(String),

    #[error("container.xml does not name a package document")]
    MissingRootfile,

    #[error("Malformed {path}: {detail}")]
    Malformed { path: String, detail: String },

    #[error("Failed to read {path}: {detail}")]
    ReadFailed { path: String, detail: String },

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Malformed package XML: {0}")]
    MalformedXml(String),

    #[error("Package document has no <{0}> element")]
    MissingElement(&'static str),

    #[error("Spine has no items that resolve to the manifest")]
    EmptySpine,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid UTF-8 in {path}: {detail}")]
    InvalidUtf8 { path: String, detail: String },

    #[error("Malformed {path}: {detail}")]
    Malformed { path: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("Empty address string")]
    Empty,

    #[error("Address must start with 'epubcfi(/6/'")]
    MissingPrefix,

    #[error("Address must end with ')'")]
    MissingClosingParen,

    #[error("Spine step must be a positive even integer, got {0}")]
    InvalidSpineStep(u32),

    #[error("Expected number at position {0}")]
    ExpectedNumber(usize),

    #[error("Unclosed bracket at position {0}")]
    UnclosedBracket(usize),

    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("Invalid range: {0}")]
    InvalidRange(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    #[error("{scheme} content requires a passphrase")]
    CredentialsRequired { scheme: String },

    #[error("Passphrase does not unlock the license")]
    InvalidPassphrase,

    #[error("Unsupported protection scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Unsupported encryption algorithm {algorithm} for {path}")]
    UnsupportedAlgorithm { path: String, algorithm: String },

    #[error("Could not decrypt {path}: {detail}")]
    Corrupt { path: String, detail: String },
}
