use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side on the executor's account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Open a replicated position on a target account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOrder {
    #[serde(default)]
    pub command_id: String,
    pub trade_id: String,
    pub target_account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub lot_size: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub magic_number: i64,
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// Close a replicated position on a target account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseOrder {
    #[serde(default)]
    pub command_id: String,
    pub trade_id: String,
    pub target_account_id: String,
    pub symbol: String,
    /// Executor-side ticket of the position to close (0 = resolve by magic number)
    #[serde(default)]
    pub ticket: i64,
    #[serde(default)]
    pub magic_number: i64,
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// Envelope sent from the core to an executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CoreMessage {
    ExecuteOrder(ExecuteOrder),
    CloseOrder(CloseOrder),
}

impl CoreMessage {
    pub fn command_id(&self) -> &str {
        match self {
            CoreMessage::ExecuteOrder(order) => &order.command_id,
            CoreMessage::CloseOrder(order) => &order.command_id,
        }
    }

    pub(crate) fn set_command_id(&mut self, command_id: String) {
        match self {
            CoreMessage::ExecuteOrder(order) => order.command_id = command_id,
            CoreMessage::CloseOrder(order) => order.command_id = command_id,
        }
    }

    pub fn trade_id(&self) -> &str {
        match self {
            CoreMessage::ExecuteOrder(order) => &order.trade_id,
            CoreMessage::CloseOrder(order) => &order.trade_id,
        }
    }

    pub fn target_account_id(&self) -> &str {
        match self {
            CoreMessage::ExecuteOrder(order) => &order.target_account_id,
            CoreMessage::CloseOrder(order) => &order.target_account_id,
        }
    }

    /// Serialize for storage in the journal payload column
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// Checkpoint along the delivery path.
///
/// Variants are declared in path order so `Ord` reflects progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckStage {
    #[default]
    Unspecified,
    /// Synthetic stage for executors without acknowledgement support
    CoreAccepted,
    /// Executor process received and buffered the command
    AgentBuffered,
    /// Relay hop handed the command to the terminal
    PipeDelivered,
    /// Terminal confirmed execution with the broker
    EaConfirmed,
}

impl AckStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckStage::Unspecified => "UNSPECIFIED",
            AckStage::CoreAccepted => "CORE_ACCEPTED",
            AckStage::AgentBuffered => "AGENT_BUFFERED",
            AckStage::PipeDelivered => "PIPE_DELIVERED",
            AckStage::EaConfirmed => "EA_CONFIRMED",
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            AckStage::Unspecified => 0,
            AckStage::CoreAccepted => 1,
            AckStage::AgentBuffered => 2,
            AckStage::PipeDelivered => 3,
            AckStage::EaConfirmed => 4,
        }
    }

    /// Unknown codes map to `Unspecified`
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => AckStage::CoreAccepted,
            2 => AckStage::AgentBuffered,
            3 => AckStage::PipeDelivered,
            4 => AckStage::EaConfirmed,
            _ => AckStage::Unspecified,
        }
    }

    pub fn is_final(&self) -> bool {
        *self == AckStage::EaConfirmed
    }
}

impl std::fmt::Display for AckStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome reported by an acknowledgement or recorded for an attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckResult {
    #[default]
    Unspecified,
    Ok,
    Failed,
    Pending,
}

impl AckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckResult::Unspecified => "UNSPECIFIED",
            AckResult::Ok => "OK",
            AckResult::Failed => "FAILED",
            AckResult::Pending => "PENDING",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "OK" => AckResult::Ok,
            "FAILED" => AckResult::Failed,
            "PENDING" => AckResult::Pending,
            _ => AckResult::Unspecified,
        }
    }
}

impl std::fmt::Display for AckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broker-side rejection reasons carried by failed acknowledgements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    #[default]
    Unspecified,
    InvalidPrice,
    InvalidStops,
    InvalidVolume,
    MarketClosed,
    NoMoney,
    OffQuotes,
    PriceChanged,
    Requote,
    BrokerBusy,
    Timeout,
    TooManyRequests,
    TradeDisabled,
    LongOnly,
    ShortOnly,
    SpecMissing,
    RiskPolicyMissing,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unspecified => "ERROR_CODE_UNSPECIFIED",
            ErrorCode::InvalidPrice => "ERROR_CODE_INVALID_PRICE",
            ErrorCode::InvalidStops => "ERROR_CODE_INVALID_STOPS",
            ErrorCode::InvalidVolume => "ERROR_CODE_INVALID_VOLUME",
            ErrorCode::MarketClosed => "ERROR_CODE_MARKET_CLOSED",
            ErrorCode::NoMoney => "ERROR_CODE_NO_MONEY",
            ErrorCode::OffQuotes => "ERROR_CODE_OFF_QUOTES",
            ErrorCode::PriceChanged => "ERROR_CODE_PRICE_CHANGED",
            ErrorCode::Requote => "ERROR_CODE_REQUOTE",
            ErrorCode::BrokerBusy => "ERROR_CODE_BROKER_BUSY",
            ErrorCode::Timeout => "ERROR_CODE_TIMEOUT",
            ErrorCode::TooManyRequests => "ERROR_CODE_TOO_MANY_REQUESTS",
            ErrorCode::TradeDisabled => "ERROR_CODE_TRADE_DISABLED",
            ErrorCode::LongOnly => "ERROR_CODE_LONG_ONLY",
            ErrorCode::ShortOnly => "ERROR_CODE_SHORT_ONLY",
            ErrorCode::SpecMissing => "ERROR_CODE_SPEC_MISSING",
            ErrorCode::RiskPolicyMissing => "ERROR_CODE_RISK_POLICY_MISSING",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Acknowledgement sent back by an executor for one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command_id: String,
    pub stage: AckStage,
    pub result: AckResult,
    #[serde(default)]
    pub error_code: ErrorCode,
}

impl CommandAck {
    pub fn ok(command_id: impl Into<String>, stage: AckStage) -> Self {
        Self {
            command_id: command_id.into(),
            stage,
            result: AckResult::Ok,
            error_code: ErrorCode::Unspecified,
        }
    }

    pub fn failed(command_id: impl Into<String>, stage: AckStage, error_code: ErrorCode) -> Self {
        Self {
            command_id: command_id.into(),
            stage,
            result: AckResult::Failed,
            error_code,
        }
    }
}
