use solana_account::Account;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::pubsub_client::PubsubClientError;
use solana_client::rpc_client::SerializableTransaction;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSignatureSubscribeConfig, RpcSimulateTransactionConfig,
};
use solana_client::rpc_response::{RpcSignatureResult, TransactionError, UiTransactionError};
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_keypair::Signer;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::SignerError;
use solana_transaction::versioned::VersionedTransaction;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use x402_types::chain::{ChainId, ChainProviderOps, FromConfig};
use x402_types::proto::ErrorKind;

use crate::chain::config::SolanaChainConfig;
use crate::chain::types::{Address, SolanaChainReference};

/// Maximum time to wait for settlement confirmation before giving up.
///
/// Matches the Solana cluster's blockhash validity window (~150 slots,
/// roughly 60-90s on mainnet), beyond which a transaction can no longer land.
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(1000);
const BLOCKHEIGHT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Errors that can occur when interacting with a Solana chain provider.
#[derive(thiserror::Error, Debug)]
pub enum SolanaChainProviderError {
    /// Failed to sign a transaction.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// The transaction was invalid or failed simulation.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] UiTransactionError),
    /// RPC transport error.
    #[error(transparent)]
    Transport(Box<ClientErrorKind>),
    /// WebSocket pubsub transport error.
    #[error(transparent)]
    PubsubTransport(#[from] PubsubClientError),
    /// The transaction's blockhash expired before confirmation landed.
    #[error("blockhash height exceeded before confirmation")]
    BlockheightExceeded,
    /// Confirmation did not land within the settlement deadline.
    #[error("confirmation timed out")]
    ConfirmationTimedOut,
    #[error("{0}")]
    #[allow(dead_code)] // Public for consumption by downstream crates.
    Custom(String),
}

impl From<ClientError> for SolanaChainProviderError {
    fn from(value: ClientError) -> Self {
        SolanaChainProviderError::Transport(value.kind)
    }
}

impl From<&SolanaChainProviderError> for ErrorKind {
    fn from(value: &SolanaChainProviderError) -> Self {
        match value {
            SolanaChainProviderError::BlockheightExceeded => {
                ErrorKind::SettleExactSvmBlockHeightExceeded
            }
            SolanaChainProviderError::ConfirmationTimedOut => {
                ErrorKind::SettleExactSvmTransactionConfirmationTimedOut
            }
            SolanaChainProviderError::InvalidTransaction(_) => {
                ErrorKind::InvalidExactSvmPayloadTransactionSimulationFailed
            }
            _ => ErrorKind::UnexpectedSettleError,
        }
    }
}

/// Provider for interacting with a Solana blockchain.
///
/// This provider handles transaction signing, simulation, and submission for
/// Solana-based x402 payments. It supports both RPC polling and WebSocket
/// subscriptions for transaction confirmation.
pub struct SolanaChainProvider {
    /// The Solana network this provider connects to.
    chain: SolanaChainReference,
    /// The keypair used for signing transactions.
    keypair: Arc<Keypair>,
    /// The RPC client for sending requests.
    rpc_client: Arc<RpcClient>,
    /// Optional WebSocket client for subscriptions.
    pubsub_client: Option<Arc<PubsubClient>>,
    /// Maximum compute units allowed per transaction.
    max_compute_unit_limit: u32,
    /// Hard cap on the compute unit price the facilitator will accept, in micro-lamports.
    max_compute_unit_price: u64,
}

impl Debug for SolanaChainProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaChainProvider")
            .field("pubkey", &self.keypair.pubkey())
            .field("chain", &self.chain)
            .field("rpc_url", &self.rpc_client.url())
            .finish()
    }
}

impl SolanaChainProvider {
    pub async fn new(
        keypair: Keypair,
        rpc_url: String,
        pubsub_url: Option<String>,
        chain: SolanaChainReference,
        max_compute_unit_limit: u32,
        max_compute_unit_price: u64,
    ) -> Result<Self, PubsubClientError> {
        let signer_addresses = vec![keypair.pubkey()];
        let chain_id: ChainId = chain.into();
        tracing::info!(
            chain = %chain_id,
            rpc = rpc_url,
            pubsub = ?pubsub_url,
            signers = ?signer_addresses,
            max_compute_unit_limit,
            max_compute_unit_price,
            "Using Solana provider"
        );
        let rpc_client = RpcClient::new(rpc_url);
        let pubsub_client = if let Some(pubsub_url) = pubsub_url {
            let client = PubsubClient::new(pubsub_url).await?;
            Some(client)
        } else {
            None
        };
        Ok(Self {
            keypair: Arc::new(keypair),
            chain,
            rpc_client: Arc::new(rpc_client),
            pubsub_client: pubsub_client.map(Arc::new),
            max_compute_unit_limit,
            max_compute_unit_price,
        })
    }

    pub fn rpc_client(&self) -> Arc<RpcClient> {
        Arc::clone(&self.rpc_client)
    }

    pub fn pubsub_client(&self) -> Option<Arc<PubsubClient>> {
        self.pubsub_client.clone()
    }

    pub async fn send(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, SolanaChainProviderError> {
        let signature = self
            .rpc_client
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await?;
        Ok(signature)
    }

    async fn is_blockhash_valid(
        &self,
        blockhash: solana_message::Hash,
    ) -> Result<bool, SolanaChainProviderError> {
        Ok(self
            .rpc_client
            .is_blockhash_valid(&blockhash, CommitmentConfig::processed())
            .await?)
    }
}

#[async_trait::async_trait]
impl FromConfig<SolanaChainConfig> for SolanaChainProvider {
    async fn from_config(config: &SolanaChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let rpc_url = config.rpc();
        let pubsub_url = config.pubsub().clone().map(|url| url.to_string());
        let keypair = Keypair::from_base58_string(&config.signer().to_string());
        let max_compute_unit_limit = config.max_compute_unit_limit();
        let max_compute_unit_price = config.max_compute_unit_price();
        let chain = config.chain_reference();
        let provider = Self::new(
            keypair,
            rpc_url.to_string(),
            pubsub_url,
            chain,
            max_compute_unit_limit,
            max_compute_unit_price,
        )
        .await?;
        Ok(provider)
    }
}

impl ChainProviderOps for SolanaChainProvider {
    fn signer_addresses(&self) -> Vec<String> {
        vec![self.fee_payer().to_string()]
    }

    fn chain_id(&self) -> ChainId {
        self.chain.into()
    }
}

pub trait SolanaChainProviderLike {
    fn simulate_transaction_with_config(
        &self,
        tx: &VersionedTransaction,
        cfg: RpcSimulateTransactionConfig,
    ) -> impl Future<Output = Result<(), SolanaChainProviderError>> + Send;
    fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> impl Future<Output = Result<Vec<Option<Account>>, SolanaChainProviderError>> + Send;
    fn max_compute_unit_limit(&self) -> u32;
    fn max_compute_unit_price(&self) -> u64;
    fn pubkey(&self) -> Pubkey;
    fn fee_payer(&self) -> Address;
    fn sign(
        &self,
        tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, SolanaChainProviderError>;
    /// Submits `tx` and waits for it to confirm or for the settlement window to close.
    ///
    /// Races confirmation against a watch on `tx`'s own recent blockhash; once the
    /// cluster invalidates that blockhash the transaction can no longer land, so this
    /// returns `BlockheightExceeded` instead of waiting out the full deadline.
    fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
    ) -> impl Future<Output = Result<Signature, SolanaChainProviderError>> + Send;
}

impl SolanaChainProviderLike for SolanaChainProvider {
    async fn simulate_transaction_with_config(
        &self,
        tx: &VersionedTransaction,
        cfg: RpcSimulateTransactionConfig,
    ) -> Result<(), SolanaChainProviderError> {
        let sim = self
            .rpc_client
            .simulate_transaction_with_config(tx, cfg)
            .await?;
        match sim.value.err {
            None => Ok(()),
            Some(e) => Err(SolanaChainProviderError::InvalidTransaction(e)),
        }
    }

    async fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<Account>>, SolanaChainProviderError> {
        let accounts = self.rpc_client.get_multiple_accounts(pubkeys).await?;
        Ok(accounts)
    }

    fn max_compute_unit_limit(&self) -> u32 {
        self.max_compute_unit_limit
    }

    fn max_compute_unit_price(&self) -> u64 {
        self.max_compute_unit_price
    }

    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn fee_payer(&self) -> Address {
        Address::new(self.keypair.pubkey())
    }

    fn sign(
        &self,
        tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, SolanaChainProviderError> {
        let mut tx = tx.clone();
        let msg_bytes = tx.message.serialize();
        let signature = self.keypair.try_sign_message(msg_bytes.as_slice())?;
        let num_required = tx.message.header().num_required_signatures as usize;
        let static_keys = tx.message.static_account_keys();
        let pos = static_keys[..num_required]
            .iter()
            .position(|k| *k == self.pubkey())
            .ok_or(SolanaChainProviderError::InvalidTransaction(
                UiTransactionError::from(TransactionError::InvalidAccountIndex),
            ))?;
        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[pos] = signature;
        Ok(tx)
    }

    async fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, SolanaChainProviderError> {
        let tx_sig = *tx.get_signature();
        let recent_blockhash = *tx.message.recent_blockhash();
        self.send(tx).await?;

        let confirm = self.confirm(tx_sig);
        let blockheight_watch = self.watch_blockhash(recent_blockhash);
        let deadline = tokio::time::sleep(CONFIRMATION_TIMEOUT);

        tokio::select! {
            result = confirm => result.map(|_| tx_sig),
            result = blockheight_watch => result.map(|_| tx_sig),
            _ = deadline => Err(SolanaChainProviderError::ConfirmationTimedOut),
        }
    }
}

impl SolanaChainProvider {
    async fn confirm(&self, tx_sig: Signature) -> Result<(), SolanaChainProviderError> {
        use futures_util::stream::StreamExt;

        if let Some(pubsub_client) = self.pubsub_client.as_ref() {
            let config = RpcSignatureSubscribeConfig {
                commitment: Some(CommitmentConfig::confirmed()),
                enable_received_notification: None,
            };
            let (mut stream, unsubscribe) = pubsub_client
                .signature_subscribe(&tx_sig, Some(config))
                .await?;
            let response = stream.next().await;
            unsubscribe().await;
            match response {
                Some(response) => {
                    let error = if let RpcSignatureResult::ProcessedSignature(r) = response.value
                    {
                        r.err
                    } else {
                        None
                    };
                    match error {
                        None => Ok(()),
                        Some(error) => Err(SolanaChainProviderError::InvalidTransaction(error)),
                    }
                }
                None => Err(SolanaChainProviderError::Transport(Box::new(
                    ClientErrorKind::Custom(
                        "Can not get response from signatureSubscribe".to_string(),
                    ),
                ))),
            }
        } else {
            loop {
                let statuses = self.rpc_client.get_signature_statuses(&[tx_sig]).await?;
                if let Some(Some(status)) = statuses.value.into_iter().next() {
                    if status.confirmation_status.is_some() || status.confirmations.is_none() {
                        return match status.err {
                            None => Ok(()),
                            Some(err) => Err(SolanaChainProviderError::InvalidTransaction(
                                UiTransactionError::from(err),
                            )),
                        };
                    }
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }

    /// Polls whether `blockhash` — the transaction's own recent blockhash —
    /// is still valid. Once the cluster has moved past its ~150-slot validity
    /// window the transaction can never land, so there's no point waiting
    /// out the rest of the confirmation deadline.
    async fn watch_blockhash(
        &self,
        blockhash: solana_message::Hash,
    ) -> Result<(), SolanaChainProviderError> {
        loop {
            if !self.is_blockhash_valid(blockhash).await? {
                return Err(SolanaChainProviderError::BlockheightExceeded);
            }
            tokio::time::sleep(BLOCKHEIGHT_POLL_INTERVAL).await;
        }
    }
}

impl<T: SolanaChainProviderLike> SolanaChainProviderLike for Arc<T> {
    fn simulate_transaction_with_config(
        &self,
        tx: &VersionedTransaction,
        cfg: RpcSimulateTransactionConfig,
    ) -> impl Future<Output = Result<(), SolanaChainProviderError>> + Send {
        (**self).simulate_transaction_with_config(tx, cfg)
    }

    fn get_multiple_accounts(
        &self,
        pubkeys: &[Pubkey],
    ) -> impl Future<Output = Result<Vec<Option<Account>>, SolanaChainProviderError>> + Send {
        (**self).get_multiple_accounts(pubkeys)
    }

    fn max_compute_unit_limit(&self) -> u32 {
        (**self).max_compute_unit_limit()
    }

    fn max_compute_unit_price(&self) -> u64 {
        (**self).max_compute_unit_price()
    }

    fn pubkey(&self) -> Pubkey {
        (**self).pubkey()
    }

    fn fee_payer(&self) -> Address {
        (**self).fee_payer()
    }

    fn sign(
        &self,
        tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, SolanaChainProviderError> {
        (**self).sign(tx)
    }

    fn send_and_confirm(
        &self,
        tx: &VersionedTransaction,
    ) -> impl Future<Output = Result<Signature, SolanaChainProviderError>> + Send {
        (**self).send_and_confirm(tx)
    }
}
