//! Multicall3 batch executor.
//!
//! Batches many read calls into one `aggregate3` RPC request, cutting
//! per-pool discovery from several round trips to a handful per factory.
//! Identical calls are coalesced before batching and results are mapped back
//! to the original order. Individual call failures are tolerated
//! (`allowFailure = true`); a failed call yields empty bytes, which the
//! decoders treat as missing data.

use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::types::{Address, Bytes};
use indexmap::IndexMap;
use log::{debug, warn};
use std::sync::Arc;

use crate::errors::{EngineError, EngineResult};
use crate::gateway::ChainGateway;
use crate::metrics;

/// A single read call to be batched.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub target: Address,
    pub call_data: Bytes,
}

/// Maximum calls per batch; larger batches get rejected by public RPCs.
const MAX_BATCH_SIZE: usize = 200;
const MIN_BATCH_SIZE: usize = 50;

#[derive(Clone)]
pub struct Multicall {
    gateway: Arc<dyn ChainGateway>,
    multicall_address: Address,
    batch_size: usize,
}

impl Multicall {
    pub fn new(gateway: Arc<dyn ChainGateway>, multicall_address: Address, batch_size: usize) -> Self {
        if batch_size > MAX_BATCH_SIZE {
            warn!(
                "batch size {} exceeds recommended maximum ({}), capping",
                batch_size, MAX_BATCH_SIZE
            );
        }
        Self {
            gateway,
            multicall_address,
            batch_size: batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
        }
    }

    /// Runs a batch of calls, returning one result per input call in input
    /// order. A call that reverted on-chain comes back as empty bytes.
    pub async fn run(&self, calls: Vec<Call>) -> EngineResult<Vec<Bytes>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Coalesce identical calls to reduce load
        let mut unique_calls = IndexMap::new();
        let mut original_indices = vec![0usize; calls.len()];
        for (i, call) in calls.iter().enumerate() {
            let (index, _) = unique_calls.insert_full((call.target, call.call_data.clone()), ());
            original_indices[i] = index;
        }
        let unique: Vec<Call> = unique_calls
            .into_keys()
            .map(|(target, call_data)| Call { target, call_data })
            .collect();
        debug!("multicall coalesced {} calls into {}", calls.len(), unique.len());

        let mut results: Vec<Bytes> = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(self.batch_size) {
            metrics::record_multicall_batch_size(chunk.len() as f64);
            results.extend(self.execute_aggregate3(chunk).await?);
        }

        Ok(original_indices
            .into_iter()
            .map(|index| results[index].clone())
            .collect())
    }

    /// One `aggregate3((address,bool,bytes)[])` round trip.
    async fn execute_aggregate3(&self, calls: &[Call]) -> EngineResult<Vec<Bytes>> {
        let call_tokens: Vec<Token> = calls
            .iter()
            .map(|call| {
                Token::Tuple(vec![
                    Token::Address(call.target),
                    Token::Bool(true), // allowFailure
                    Token::Bytes(call.call_data.to_vec()),
                ])
            })
            .collect();

        let function = aggregate3_function();
        let calldata = function
            .encode_input(&[Token::Array(call_tokens)])
            .map_err(|e| EngineError::BadData(format!("aggregate3 encode: {}", e)))?;

        let response = self
            .gateway
            .read_contract(self.multicall_address, Bytes::from(calldata))
            .await?;

        let decoded = ethers::abi::decode(
            &[ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Bool,
                ParamType::Bytes,
            ])))],
            &response,
        )
        .map_err(|e| EngineError::BadData(format!("aggregate3 decode: {}", e)))?;

        let results_array = decoded
            .into_iter()
            .next()
            .and_then(|token| token.into_array())
            .ok_or_else(|| EngineError::BadData("invalid multicall response format".into()))?;

        let mut return_data = Vec::with_capacity(results_array.len());
        for result_token in results_array {
            match result_token {
                Token::Tuple(mut tuple) if tuple.len() >= 2 => {
                    let success = matches!(tuple[0], Token::Bool(true));
                    match tuple.remove(1) {
                        Token::Bytes(data) if success => return_data.push(Bytes::from(data)),
                        // failed or malformed: empty marker
                        _ => return_data.push(Bytes::new()),
                    }
                }
                _ => return_data.push(Bytes::new()),
            }
        }
        if return_data.len() != calls.len() {
            return Err(EngineError::BadData(format!(
                "multicall returned {} results for {} calls",
                return_data.len(),
                calls.len()
            )));
        }
        Ok(return_data)
    }
}

fn aggregate3_function() -> Function {
    #[allow(deprecated)]
    Function {
        name: "aggregate3".to_string(),
        inputs: vec![Param {
            name: "calls".to_string(),
            kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Bool,
                ParamType::Bytes,
            ]))),
            internal_type: None,
        }],
        outputs: vec![Param {
            name: "returnData".to_string(),
            kind: ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Bool,
                ParamType::Bytes,
            ]))),
            internal_type: None,
        }],
        constant: None,
        state_mutability: StateMutability::Payable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers::types::{Filter, Log, TransactionReceipt, H256, U256};
    use tokio::sync::mpsc;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    /// Gateway that decodes the aggregate3 request and answers each inner
    /// call with its target address as a 32-byte word.
    struct EchoGateway;

    #[async_trait]
    impl ChainGateway for EchoGateway {
        async fn read_contract(&self, _to: Address, calldata: Bytes) -> EngineResult<Bytes> {
            let function = aggregate3_function();
            let tokens = function
                .decode_input(&calldata[4..])
                .map_err(|e| EngineError::BadData(e.to_string()))?;
            let calls = tokens
                .into_iter()
                .next()
                .and_then(|t| t.into_array())
                .expect("aggregate3 takes one array argument");

            let results: Vec<Token> = calls
                .into_iter()
                .map(|call| {
                    let tuple = call.into_tuple().expect("Call3 tuple");
                    let target = tuple[0].clone().into_address().expect("target");
                    let mut word = [0u8; 32];
                    word[12..].copy_from_slice(target.as_bytes());
                    Token::Tuple(vec![Token::Bool(true), Token::Bytes(word.to_vec())])
                })
                .collect();
            let encoded = ethers::abi::encode(&[Token::Array(results)]);
            Ok(Bytes::from(encoded))
        }

        async fn get_block_number(&self) -> EngineResult<u64> {
            Ok(0)
        }
        async fn get_block(&self, _: u64) -> EngineResult<Option<crate::types::BlockEvent>> {
            Ok(None)
        }
        async fn get_transaction(
            &self,
            _: H256,
        ) -> EngineResult<Option<ethers::types::Transaction>> {
            Ok(None)
        }
        async fn get_transaction_receipt(
            &self,
            _: H256,
        ) -> EngineResult<Option<TransactionReceipt>> {
            Ok(None)
        }
        async fn get_logs(&self, _: &Filter) -> EngineResult<Vec<Log>> {
            Ok(Vec::new())
        }
        async fn get_gas_price(&self) -> EngineResult<U256> {
            Ok(U256::zero())
        }
        async fn estimate_gas(
            &self,
            _: &ethers::types::transaction::eip2718::TypedTransaction,
        ) -> EngineResult<u64> {
            Ok(21_000)
        }
        async fn send_transaction(
            &self,
            _: ethers::types::transaction::eip2718::TypedTransaction,
        ) -> EngineResult<H256> {
            Err(EngineError::Execution("read-only".into()))
        }
        async fn wait_for_receipt(&self, _: H256) -> EngineResult<Option<TransactionReceipt>> {
            Ok(None)
        }
        async fn watch_blocks(
            &self,
        ) -> EngineResult<(mpsc::Receiver<crate::types::BlockEvent>, crate::gateway::WatchHandle)>
        {
            Err(EngineError::Rpc("no subscriptions".into()))
        }
        async fn watch_pending_txs(
            &self,
        ) -> EngineResult<(mpsc::Receiver<H256>, crate::gateway::WatchHandle)> {
            Err(EngineError::Rpc("no subscriptions".into()))
        }
    }

    #[tokio::test]
    async fn batches_and_preserves_input_order() {
        let multicall = Multicall::new(Arc::new(EchoGateway), addr(0xfff), 100);
        let calls: Vec<Call> = (1u64..=5)
            .map(|n| Call {
                target: addr(n),
                call_data: Bytes::from(vec![0xAA]),
            })
            .collect();
        let results = multicall.run(calls).await.unwrap();
        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(&result[12..], addr(i as u64 + 1).as_bytes());
        }
    }

    #[tokio::test]
    async fn coalesces_identical_calls() {
        let multicall = Multicall::new(Arc::new(EchoGateway), addr(0xfff), 100);
        let repeated = Call {
            target: addr(7),
            call_data: Bytes::from(vec![0xAA]),
        };
        let calls = vec![repeated.clone(), repeated.clone(), repeated];
        let results = multicall.run(calls).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| &r[12..] == addr(7).as_bytes()));
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let multicall = Multicall::new(Arc::new(EchoGateway), addr(0xfff), 100);
        assert!(multicall.run(Vec::new()).await.unwrap().is_empty());
    }
}
