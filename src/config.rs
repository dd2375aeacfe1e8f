use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::SettlementError;
use crate::types::RequestType;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL (store, advisory locks and outbox)
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub nacha: NachaConfig,
    #[serde(default)]
    pub inbound: InboundConfig,
}

fn default_max_connections() -> u32 {
    20
}

/// Message bus topic names, passed explicitly into every component that publishes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopicConfig {
    pub execute_payment_response: String,
    pub consolidated_payment_response: String,
    pub payment_event: String,
    pub file_processing_completed: String,
    pub record_processing: String,
    pub record_feedback: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            execute_payment_response: "payments.execute.response".to_string(),
            consolidated_payment_response: "payments.consolidated.response".to_string(),
            payment_event: "payments.timeline.event".to_string(),
            file_processing_completed: "files.processing.completed".to_string(),
            record_processing: "files.record.processing".to_string(),
            record_feedback: "files.record.feedback".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Request types folded into consolidated batches. Everything else settles individually.
    pub consolidated_request_types: Vec<RequestType>,
    pub fetch_batch_size: i64,
    pub post_process_chunk_size: usize,
    pub post_process_page_size: i64,
    pub max_retry_count: i32,
    pub outbound_folder: String,
    pub lock_retry_interval_ms: u64,
    pub schedule_interval_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            consolidated_request_types: vec![RequestType::Iaa],
            fetch_batch_size: 5000,
            post_process_chunk_size: 100,
            post_process_page_size: 5000,
            max_retry_count: 3,
            outbound_folder: "./data/outbound".to_string(),
            lock_retry_interval_ms: 250,
            schedule_interval_secs: 3600,
        }
    }
}

/// Originator and destination identity written into the file and batch headers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NachaConfig {
    pub immediate_destination: String,
    pub immediate_origin: String,
    pub destination_name: String,
    pub origin_name: String,
    pub reference_code: String,
    pub company_name: String,
    pub company_discretionary_data: String,
    pub company_id: String,
    pub sec_code: String,
    pub entry_description: String,
    /// First 8 digits of the originating bank's routing number
    pub originating_dfi: String,
}

impl Default for NachaConfig {
    fn default() -> Self {
        Self {
            immediate_destination: "021000021".to_string(),
            immediate_origin: "011401533".to_string(),
            destination_name: "DESTINATION BANK".to_string(),
            origin_name: "ORIGIN COMPANY".to_string(),
            reference_code: "".to_string(),
            company_name: "ORIGIN COMPANY".to_string(),
            company_discretionary_data: "".to_string(),
            company_id: "1234567890".to_string(),
            sec_code: "PPD".to_string(),
            entry_description: "PAYOUT".to_string(),
            originating_dfi: "01140153".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InboundFolder {
    pub path: String,
    pub archive_path: String,
    pub business_file_type: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InboundConfig {
    pub folders: Vec<InboundFolder>,
    pub poll_interval_secs: u64,
    pub retention_days: i64,
    pub record_reclaim_after_secs: i64,
    /// Business file type whose completion closes out in-progress payments
    pub completion_business_file_type: String,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            folders: vec![InboundFolder {
                path: "./data/inbound/ack".to_string(),
                archive_path: "./data/archive/ack".to_string(),
                business_file_type: "ach_ack".to_string(),
            }],
            poll_interval_secs: 60,
            retention_days: 3,
            record_reclaim_after_secs: 900,
            completion_business_file_type: "ach_ack".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, SettlementError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|e| {
            SettlementError::Config(format!("failed to read {}: {}", config_path, e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, SettlementError> {
        serde_yaml::from_str(content).map_err(|e| SettlementError::Config(e.to_string()))
    }
}
