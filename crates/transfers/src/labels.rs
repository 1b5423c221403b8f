//! Column labels of every aggregate result. Consumers look columns up by
//! these exact strings.

pub const DATE: &str = "Date";
pub const TXNS: &str = "Number of Successful Txns";
pub const USERS: &str = "Number of Users";
pub const VOLUME: &str = "Volume (USD)";
pub const FEES: &str = "Fees (USD)";
pub const SOURCE_CHAIN: &str = "Source Chain";
pub const DESTINATION_CHAIN: &str = "Destination Chain";
pub const SERVICE: &str = "Service";
pub const ASSET: &str = "Asset";

pub const CREATED_AT: &str = "Created At";
pub const EVENT_ID: &str = "Event ID";
pub const USER: &str = "User";
pub const AMOUNT: &str = "Amount";
pub const AMOUNT_USD: &str = "Amount (USD)";
pub const FEE_USD: &str = "Fee (USD)";
