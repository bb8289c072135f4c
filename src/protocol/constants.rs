//! Protocol Constants

/// JSON-RPC protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision advertised during the initialize handshake
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Lifecycle methods
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";

/// Listing methods
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
pub const METHOD_RESOURCES_LIST: &str = "resources/list";
pub const METHOD_RESOURCE_TEMPLATES_LIST: &str = "resources/templates/list";

/// Targeted methods
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
pub const METHOD_RESOURCES_READ: &str = "resources/read";

/// JSON-RPC error codes
pub const ERROR_PARSE: i64 = -32700;
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERROR_INVALID_PARAMS: i64 = -32602;
pub const ERROR_INTERNAL: i64 = -32603;
