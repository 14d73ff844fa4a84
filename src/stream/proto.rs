//! Wire messages for the `geyser.Geyser/Subscribe` RPC.
//!
//! Only the subset of the upstream schema this client sends or routes is
//! declared here. Field tags match the upstream `geyser.proto`, so unknown
//! fields sent by newer servers are skipped by the decoder.

use std::collections::BTreeMap;

use serde::Serialize;

/// Commitment level requested for delivered updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CommitmentLevel {
    Processed = 0,
    Confirmed = 1,
    Finalized = 2,
}

impl CommitmentLevel {
    /// Parses a commitment name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "processed" => Some(Self::Processed),
            "confirmed" => Some(Self::Confirmed),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// Outbound subscription message with named filter groups.
#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct SubscribeRequest {
    #[prost(btree_map = "string, message", tag = "1")]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub accounts: BTreeMap<String, SubscribeRequestFilterAccounts>,

    #[prost(btree_map = "string, message", tag = "3")]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub transactions: BTreeMap<String, SubscribeRequestFilterTransactions>,

    #[prost(enumeration = "CommitmentLevel", optional, tag = "6")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct SubscribeRequestFilterAccounts {
    #[prost(string, repeated, tag = "2")]
    pub account: Vec<String>,

    #[prost(string, repeated, tag = "3")]
    pub owner: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct SubscribeRequestFilterTransactions {
    #[prost(bool, optional, tag = "1")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<bool>,

    #[prost(bool, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,

    #[prost(string, repeated, tag = "3")]
    pub account_include: Vec<String>,

    #[prost(string, repeated, tag = "4")]
    pub account_exclude: Vec<String>,

    #[prost(string, optional, tag = "5")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[prost(string, repeated, tag = "6")]
    pub account_required: Vec<String>,
}

/// Update envelope delivered by the stream.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdate {
    /// Names of the filter groups that matched this update.
    #[prost(string, repeated, tag = "1")]
    pub filters: Vec<String>,

    #[prost(oneof = "subscribe_update::UpdateOneof", tags = "2, 3, 4, 6, 9")]
    pub update_oneof: Option<subscribe_update::UpdateOneof>,
}

pub mod subscribe_update {
    /// Envelope tag. Tags this client does not declare decode as `None`.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum UpdateOneof {
        #[prost(message, tag = "2")]
        Account(super::SubscribeUpdateAccount),
        #[prost(message, tag = "3")]
        Slot(super::SubscribeUpdateSlot),
        #[prost(message, tag = "4")]
        Transaction(super::SubscribeUpdateTransaction),
        #[prost(message, tag = "6")]
        Ping(super::SubscribeUpdatePing),
        #[prost(message, tag = "9")]
        Pong(super::SubscribeUpdatePong),
    }
}

impl SubscribeUpdate {
    /// Short label for the envelope tag, used in traces.
    pub fn kind(&self) -> &'static str {
        use subscribe_update::UpdateOneof;

        match &self.update_oneof {
            Some(UpdateOneof::Account(_)) => "account",
            Some(UpdateOneof::Slot(_)) => "slot",
            Some(UpdateOneof::Transaction(_)) => "transaction",
            Some(UpdateOneof::Ping(_)) => "ping",
            Some(UpdateOneof::Pong(_)) => "pong",
            None => "unknown",
        }
    }

    /// Returns the account update, if this envelope carries one.
    pub fn account(&self) -> Option<&SubscribeUpdateAccount> {
        match &self.update_oneof {
            Some(subscribe_update::UpdateOneof::Account(update)) => Some(update),
            _ => None,
        }
    }

    /// Returns the transaction update, if this envelope carries one.
    pub fn transaction(&self) -> Option<&SubscribeUpdateTransaction> {
        match &self.update_oneof {
            Some(subscribe_update::UpdateOneof::Transaction(update)) => Some(update),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdateAccount {
    #[prost(message, optional, tag = "1")]
    pub account: Option<SubscribeUpdateAccountInfo>,

    #[prost(uint64, tag = "2")]
    pub slot: u64,

    #[prost(bool, tag = "3")]
    pub is_startup: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdateAccountInfo {
    #[prost(bytes = "vec", tag = "1")]
    pub pubkey: Vec<u8>,

    #[prost(uint64, tag = "2")]
    pub lamports: u64,

    #[prost(bytes = "vec", tag = "3")]
    pub owner: Vec<u8>,

    #[prost(bool, tag = "4")]
    pub executable: bool,

    #[prost(uint64, tag = "5")]
    pub rent_epoch: u64,

    #[prost(bytes = "vec", tag = "6")]
    pub data: Vec<u8>,

    #[prost(uint64, tag = "7")]
    pub write_version: u64,

    #[prost(bytes = "vec", optional, tag = "8")]
    pub txn_signature: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdateTransaction {
    #[prost(message, optional, tag = "1")]
    pub transaction: Option<SubscribeUpdateTransactionInfo>,

    #[prost(uint64, tag = "2")]
    pub slot: u64,
}

/// Transaction update. The body and status meta stay encoded; callers that
/// need them decode with the upstream `solana.storage` schema.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdateTransactionInfo {
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,

    #[prost(bool, tag = "2")]
    pub is_vote: bool,

    #[prost(bytes = "vec", tag = "3")]
    pub transaction: Vec<u8>,

    #[prost(bytes = "vec", tag = "4")]
    pub meta: Vec<u8>,

    #[prost(uint64, tag = "5")]
    pub index: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdateSlot {
    #[prost(uint64, tag = "1")]
    pub slot: u64,

    #[prost(uint64, optional, tag = "2")]
    pub parent: Option<u64>,

    #[prost(int32, tag = "3")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdatePing {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscribeUpdatePong {
    #[prost(int32, tag = "1")]
    pub id: i32,
}

/// Client stub for the `geyser.Geyser` service.
pub mod geyser_client {
    use tonic::codegen::*;

    use super::SubscribeUpdate;
    use crate::stream::client::OutboundStream;

    /// Streaming client for `geyser.Geyser/Subscribe`.
    #[derive(Debug, Clone)]
    pub struct GeyserClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl GeyserClient<tonic::transport::Channel> {
        /// Wraps an established channel.
        pub fn new(channel: tonic::transport::Channel) -> Self {
            let inner = tonic::client::Grpc::new(channel);
            Self { inner }
        }
    }

    impl<T> GeyserClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        /// Limits the maximum size of a decoded update.
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }

        /// Opens the bidirectional subscription stream.
        pub async fn subscribe(
            &mut self,
            mut request: tonic::Request<OutboundStream>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<SubscribeUpdate>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/geyser.Geyser/Subscribe");
            request
                .extensions_mut()
                .insert(GrpcMethod::new("geyser.Geyser", "Subscribe"));
            self.inner.streaming(request, path, codec).await
        }
    }
}
