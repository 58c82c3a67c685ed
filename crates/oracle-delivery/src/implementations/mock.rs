//! In-process ledger simulating the factory and game contracts.
//!
//! Used as the chain client in tests and by the `mock` delivery backend for
//! dry runs. Every submitted transaction is applied synchronously and mined
//! in its own block. Faults can be injected per contract function to make
//! submissions revert, vanish, get evicted, lose their receipt, be refused,
//! fail in transport or fail estimation. Calls are counted per function so callers can assert on what
//! was, and was not, sent.

use crate::{ChainClient, DeliveryError, DeliveryFactory, DeliveryRegistry};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use async_trait::async_trait;
use oracle_config::NetworkConfig;
use oracle_types::contracts::{ICricketBettingFactory, ICricketBettingGame};
use oracle_types::{
	Address, BallOutcome, BallPhase, Bytes, ConfigSchema, ContractCall, Field, FieldType,
	ImplementationRegistry, Log, Schema, SignedTransaction, TransactionHash, TransactionReceipt,
	ValidationError, B256, MAX_BALLS, U256,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_GAS_ESTIMATE: u64 = 50_000;
const DEFAULT_GAS_PRICE: u128 = 1_000_000_000;

/// Failure modes that can be injected for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
	/// Mined with failed status. Consumes the nonce, leaves state unchanged.
	Revert,
	/// Accepted but never mined. Consumes the nonce, no receipt ever appears.
	Timeout,
	/// Accepted, then evicted from the mempool. The nonce is not consumed.
	Drop,
	/// Applied and mined, but receipt lookups keep returning nothing.
	LostReceipt,
	/// Broadcast or read fails in transport. Nothing is consumed.
	Network,
	/// The node answers the broadcast with an error. Nothing is consumed.
	Refuse,
	/// The dry-run fails.
	Estimation,
}

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
	fault: Fault,
	remaining: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct BallSlot {
	phase: BallPhase,
	outcome: BallOutcome,
	opened: bool,
}

impl Default for BallSlot {
	fn default() -> Self {
		Self {
			phase: BallPhase::Closed,
			outcome: BallOutcome::Pending,
			opened: false,
		}
	}
}

#[derive(Debug, Clone)]
struct Game {
	team_a: String,
	team_b: String,
	match_id: U256,
	balls: HashMap<u32, BallSlot>,
	current_ball: u32,
	paused: bool,
}

impl Game {
	fn ball(&self, ball: u32) -> BallSlot {
		self.balls.get(&ball).copied().unwrap_or_default()
	}
}

/// Contract state that transactions mutate.
#[derive(Debug, Clone, Default)]
struct Contracts {
	balances: HashMap<Address, U256>,
	games: HashMap<Address, Game>,
	active: Vec<Address>,
	deployed: u64,
}

/// Decoded calldata of a state-changing call.
enum LedgerCall {
	Transfer,
	CreateGame(ICricketBettingFactory::createGameCall),
	RemoveGame(Address),
	Open(U256),
	Close(U256),
	Report(U256, u8),
	Cancel(U256, String),
	Pause,
}

impl LedgerCall {
	fn decode(data: &[u8]) -> Result<(&'static str, Self), String> {
		use ICricketBettingFactory::{createGameCall, removeGameCall};
		use ICricketBettingGame::{
			cancelBallCall, closeBallCall, emergencyPauseCall, openBallCall, reportBallResultCall,
		};

		let Some(selector) = data.get(..4) else {
			return Ok(("transfer", Self::Transfer));
		};
		let err = |e: alloy::sol_types::Error| e.to_string();

		if selector == createGameCall::SELECTOR {
			Ok(("createGame", Self::CreateGame(createGameCall::abi_decode(data).map_err(err)?)))
		} else if selector == removeGameCall::SELECTOR {
			let call = removeGameCall::abi_decode(data).map_err(err)?;
			Ok(("removeGame", Self::RemoveGame(call.gameAddress)))
		} else if selector == openBallCall::SELECTOR {
			let call = openBallCall::abi_decode(data).map_err(err)?;
			Ok(("openBall", Self::Open(call.ballNumber)))
		} else if selector == closeBallCall::SELECTOR {
			let call = closeBallCall::abi_decode(data).map_err(err)?;
			Ok(("closeBall", Self::Close(call.ballNumber)))
		} else if selector == reportBallResultCall::SELECTOR {
			let call = reportBallResultCall::abi_decode(data).map_err(err)?;
			Ok(("reportBallResult", Self::Report(call.ballNumber, call.outcome)))
		} else if selector == cancelBallCall::SELECTOR {
			let call = cancelBallCall::abi_decode(data).map_err(err)?;
			Ok(("cancelBall", Self::Cancel(call.ballNumber, call.reason)))
		} else if selector == emergencyPauseCall::SELECTOR {
			Ok(("emergencyPause", Self::Pause))
		} else {
			Err(format!("unknown selector 0x{}", hex::encode(selector)))
		}
	}
}

fn ball_index(ball: U256) -> Result<u32, String> {
	u32::try_from(ball)
		.ok()
		.filter(|n| (1..=MAX_BALLS).contains(n))
		.ok_or_else(|| format!("invalid ball number {}", ball))
}

impl Contracts {
	/// Applies a call and returns its logs, or the revert reason.
	fn apply(
		&mut self,
		factory: Address,
		to: Address,
		value: U256,
		call: LedgerCall,
	) -> Result<Vec<Log>, String> {
		if let LedgerCall::Transfer = call {
			*self.balances.entry(to).or_default() += value;
			return Ok(vec![]);
		}

		if to == factory {
			return match call {
				LedgerCall::CreateGame(args) => {
					let game = factory.create(self.deployed);
					self.deployed += 1;
					self.games.insert(
						game,
						Game {
							team_a: args.teamA.clone(),
							team_b: args.teamB.clone(),
							match_id: args.matchId,
							balls: HashMap::new(),
							current_ball: 0,
							paused: false,
						},
					);
					self.active.push(game);
					let event = ICricketBettingFactory::GameCreated {
						gameAddress: game,
						teamA: args.teamA,
						teamB: args.teamB,
						matchId: args.matchId,
					};
					Ok(vec![Log {
						address: factory,
						data: event.encode_log_data(),
					}])
				},
				LedgerCall::RemoveGame(game) => {
					let before = self.active.len();
					self.active.retain(|a| *a != game);
					if self.active.len() == before {
						return Err("game not active".to_string());
					}
					Ok(vec![])
				},
				_ => Err("function not on factory".to_string()),
			};
		}

		let game = self
			.games
			.get_mut(&to)
			.ok_or_else(|| format!("no contract at {}", to))?;
		if game.paused {
			return Err("contract paused".to_string());
		}

		let (slot_ball, data) = match call {
			LedgerCall::Open(ball) => {
				let n = ball_index(ball)?;
				let mut slot = game.ball(n);
				if slot.phase != BallPhase::Closed || slot.opened {
					return Err(format!("ball {} cannot be opened from {}", n, slot.phase));
				}
				slot.phase = BallPhase::Open;
				slot.opened = true;
				game.current_ball = game.current_ball.max(n);
				let event = ICricketBettingGame::BallOpened { ballNumber: ball };
				((n, slot), event.encode_log_data())
			},
			LedgerCall::Close(ball) => {
				let n = ball_index(ball)?;
				let mut slot = game.ball(n);
				if slot.phase != BallPhase::Open {
					return Err(format!("ball {} is not open", n));
				}
				slot.phase = BallPhase::Closed;
				let event = ICricketBettingGame::BallClosed { ballNumber: ball };
				((n, slot), event.encode_log_data())
			},
			LedgerCall::Report(ball, code) => {
				let n = ball_index(ball)?;
				let mut slot = game.ball(n);
				if slot.phase != BallPhase::Closed || !slot.opened {
					return Err(format!("ball {} cannot be resolved from {}", n, slot.phase));
				}
				slot.outcome = BallOutcome::from_code(code)
					.filter(|o| o.is_reportable())
					.ok_or_else(|| format!("invalid outcome {}", code))?;
				slot.phase = BallPhase::Resolved;
				let event = ICricketBettingGame::BallResultReported {
					ballNumber: ball,
					outcome: code,
				};
				((n, slot), event.encode_log_data())
			},
			LedgerCall::Cancel(ball, reason) => {
				let n = ball_index(ball)?;
				let mut slot = game.ball(n);
				if slot.phase.is_terminal() {
					return Err(format!("ball {} already {}", n, slot.phase));
				}
				slot.phase = BallPhase::Cancelled;
				let event = ICricketBettingGame::BallCancelled {
					ballNumber: ball,
					reason,
				};
				((n, slot), event.encode_log_data())
			},
			LedgerCall::Pause => {
				game.paused = true;
				return Ok(vec![Log {
					address: to,
					data: ICricketBettingGame::EmergencyPaused {}.encode_log_data(),
				}]);
			},
			_ => return Err("function not on game contract".to_string()),
		};

		game.balls.insert(slot_ball.0, slot_ball.1);
		Ok(vec![Log { address: to, data }])
	}
}

#[derive(Debug, Default)]
struct LedgerState {
	contracts: Contracts,
	nonces: HashMap<Address, u64>,
	block: u64,
	/// Mined receipts, including ones hidden by `LostReceipt`.
	receipts: HashMap<TransactionHash, (TransactionReceipt, bool)>,
	faults: HashMap<&'static str, FaultPlan>,
	submissions: HashMap<&'static str, usize>,
	estimations: HashMap<&'static str, usize>,
	reads: usize,
	submitted: HashMap<Address, Vec<u64>>,
}

impl LedgerState {
	/// Takes one use of the fault planned for `function`, if any.
	fn take_fault(&mut self, function: &'static str) -> Option<Fault> {
		let plan = self.faults.get_mut(function)?;
		let fault = plan.fault;
		let exhausted = match &mut plan.remaining {
			Some(n) => {
				*n = n.saturating_sub(1);
				*n == 0
			},
			None => false,
		};
		if exhausted {
			self.faults.remove(function);
		}
		Some(fault)
	}

	fn peek_fault(&self, function: &'static str) -> Option<Fault> {
		self.faults.get(function).map(|plan| plan.fault)
	}
}

/// Simulated ledger hosting one factory and the games it deploys.
pub struct MockLedger {
	chain_id: u64,
	factory: Address,
	gas_estimate: u64,
	gas_price: u128,
	latency: Option<Duration>,
	state: Mutex<LedgerState>,
}

impl MockLedger {
	pub fn new(chain_id: u64, factory: Address) -> Self {
		Self {
			chain_id,
			factory,
			gas_estimate: DEFAULT_GAS_ESTIMATE,
			gas_price: DEFAULT_GAS_PRICE,
			latency: None,
			state: Mutex::new(LedgerState::default()),
		}
	}

	/// Delays every broadcast by `latency`.
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = Some(latency);
		self
	}

	pub fn factory(&self) -> Address {
		self.factory
	}

	pub fn gas_estimate(&self) -> u64 {
		self.gas_estimate
	}

	pub fn gas_price(&self) -> u128 {
		self.gas_price
	}

	/// Makes calls to `function` fail with `fault`, `times` times or forever.
	pub async fn inject(&self, function: &'static str, fault: Fault, times: Option<usize>) {
		if times == Some(0) {
			return;
		}
		self.state.lock().await.faults.insert(
			function,
			FaultPlan {
				fault,
				remaining: times,
			},
		);
	}

	/// Removes any fault planned for `function`.
	pub async fn clear(&self, function: &'static str) {
		self.state.lock().await.faults.remove(function);
	}

	/// Number of broadcasts accepted for `function`, including faulted ones.
	pub async fn submissions(&self, function: &str) -> usize {
		self.state
			.lock()
			.await
			.submissions
			.get(function)
			.copied()
			.unwrap_or(0)
	}

	/// Number of gas estimations requested for `function`.
	pub async fn estimations(&self, function: &str) -> usize {
		self.state
			.lock()
			.await
			.estimations
			.get(function)
			.copied()
			.unwrap_or(0)
	}

	/// Number of read-only calls served.
	pub async fn reads(&self) -> usize {
		self.state.lock().await.reads
	}

	/// Nonces of the transactions accepted from `from`, in arrival order.
	pub async fn submitted_nonces(&self, from: Address) -> Vec<u64> {
		self.state
			.lock()
			.await
			.submitted
			.get(&from)
			.cloned()
			.unwrap_or_default()
	}

	/// Credits `amount` to `address`.
	pub async fn fund(&self, address: Address, amount: U256) {
		*self
			.state
			.lock()
			.await
			.contracts
			.balances
			.entry(address)
			.or_default() += amount;
	}

	/// Forces the on-chain phase of a ball, bypassing the contract rules.
	pub async fn set_phase(&self, game: Address, ball: u32, phase: BallPhase) {
		let mut state = self.state.lock().await;
		if let Some(game) = state.contracts.games.get_mut(&game) {
			let slot = game.balls.entry(ball).or_default();
			slot.phase = phase;
			slot.opened |= phase != BallPhase::Closed;
		}
	}

	fn mine(
		state: &mut LedgerState,
		hash: TransactionHash,
		success: bool,
		logs: Vec<Log>,
		gas: u64,
	) -> TransactionReceipt {
		state.block += 1;
		TransactionReceipt {
			hash,
			block_number: state.block,
			success,
			gas_used: gas,
			logs,
		}
	}

	fn read(&self, contracts: &Contracts, call: &ContractCall) -> Result<Bytes, DeliveryError> {
		use ICricketBettingFactory::getActiveGamesCall;
		use ICricketBettingGame::{getBallInfoCall, getMatchInfoCall};

		let Some(selector) = call.selector() else {
			return Ok(Bytes::new());
		};
		let decode_err = |e: alloy::sol_types::Error| DeliveryError::Estimation(e.to_string());

		if call.to == self.factory && selector == getActiveGamesCall::SELECTOR {
			return Ok((contracts.active.clone(),).abi_encode_params().into());
		}

		// Reads against addresses without code return no data
		let Some(game) = contracts.games.get(&call.to) else {
			return Ok(Bytes::new());
		};

		if selector == getMatchInfoCall::SELECTOR {
			let info = (
				game.team_a.clone(),
				game.team_b.clone(),
				game.match_id,
				U256::from(game.current_ball),
				U256::from(MAX_BALLS),
			);
			Ok(info.abi_encode_params().into())
		} else if selector == getBallInfoCall::SELECTOR {
			let args = getBallInfoCall::abi_decode(&call.data).map_err(decode_err)?;
			let n = ball_index(args.ballNumber).map_err(DeliveryError::Estimation)?;
			let slot = game.ball(n);
			let info = (
				U256::from(slot.phase.code()),
				U256::from(slot.outcome.code()),
				U256::ZERO,
				[U256::ZERO; 6],
				U256::ZERO,
				false,
				slot.phase == BallPhase::Cancelled,
			);
			Ok(info.abi_encode_params().into())
		} else {
			Err(DeliveryError::Estimation(format!(
				"unknown selector 0x{}",
				hex::encode(selector)
			)))
		}
	}
}

#[async_trait]
impl ChainClient for MockLedger {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockLedgerSchema)
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn submit(&self, tx: &SignedTransaction) -> Result<TransactionHash, DeliveryError> {
		if let Some(latency) = self.latency {
			tokio::time::sleep(latency).await;
		}

		let pending = &tx.transaction;
		let (function, call) = LedgerCall::decode(&pending.data)
			.map_err(|e| DeliveryError::Refused(format!("invalid calldata: {}", e)))?;

		let mut state = self.state.lock().await;
		let fault = match state.peek_fault(function) {
			Some(Fault::Estimation) | None => None,
			Some(_) => state.take_fault(function),
		};
		match fault {
			Some(Fault::Network) => {
				return Err(DeliveryError::Network(format!(
					"connection reset while sending {}",
					function
				)));
			},
			Some(Fault::Refuse) => {
				return Err(DeliveryError::Refused(
					"insufficient funds for gas * price + value".to_string(),
				));
			},
			_ => {},
		}

		let expected = state.nonces.get(&pending.from).copied().unwrap_or(0);
		if pending.nonce != expected {
			return Err(DeliveryError::Refused(format!(
				"nonce too {}: got {}, expected {}",
				if pending.nonce < expected { "low" } else { "high" },
				pending.nonce,
				expected
			)));
		}

		state.submitted.entry(pending.from).or_default().push(pending.nonce);
		*state.submissions.entry(function).or_default() += 1;
		if fault == Some(Fault::Drop) {
			tracing::debug!(function, nonce = pending.nonce, "Evicting transaction");
			return Ok(tx.hash);
		}
		state.nonces.insert(pending.from, expected + 1);

		let gas = self.gas_estimate;
		match fault {
			Some(Fault::Timeout) => {
				tracing::debug!(function, "Dropping transaction");
			},
			Some(Fault::Revert) => {
				let receipt = Self::mine(&mut state, tx.hash, false, vec![], gas);
				state.receipts.insert(tx.hash, (receipt, true));
			},
			fault => {
				let visible = fault != Some(Fault::LostReceipt);
				let mut contracts = state.contracts.clone();
				let receipt = match contracts.apply(self.factory, pending.to, pending.value, call) {
					Ok(logs) => {
						state.contracts = contracts;
						Self::mine(&mut state, tx.hash, true, logs, gas)
					},
					Err(reason) => {
						tracing::debug!(function, reason = %reason, "Transaction reverted");
						Self::mine(&mut state, tx.hash, false, vec![], gas)
					},
				};
				state.receipts.insert(tx.hash, (receipt, visible));
			},
		}

		Ok(tx.hash)
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let state = self.state.lock().await;
		Ok(state
			.receipts
			.get(hash)
			.filter(|(_, visible)| *visible)
			.map(|(receipt, _)| receipt.clone()))
	}

	async fn get_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		Ok(self.state.lock().await.nonces.get(&address).copied().unwrap_or(0))
	}

	async fn get_gas_price(&self) -> Result<u128, DeliveryError> {
		Ok(self.gas_price)
	}

	async fn estimate_gas(&self, _from: Address, call: &ContractCall) -> Result<u64, DeliveryError> {
		let (function, decoded) =
			LedgerCall::decode(&call.data).map_err(DeliveryError::Estimation)?;

		let mut state = self.state.lock().await;
		*state.estimations.entry(function).or_default() += 1;
		if state.peek_fault(function) == Some(Fault::Estimation) {
			state.take_fault(function);
			return Err(DeliveryError::Estimation(format!(
				"execution reverted: {}",
				function
			)));
		}

		// Dry-run on a copy
		let mut contracts = state.contracts.clone();
		contracts
			.apply(self.factory, call.to, call.value, decoded)
			.map_err(|reason| DeliveryError::Estimation(format!("execution reverted: {}", reason)))?;
		Ok(self.gas_estimate)
	}

	async fn call(&self, call: &ContractCall) -> Result<Bytes, DeliveryError> {
		let mut state = self.state.lock().await;
		state.reads += 1;

		let function = match call.selector() {
			Some(s) if s == ICricketBettingGame::getBallInfoCall::SELECTOR => "getBallInfo",
			Some(s) if s == ICricketBettingGame::getMatchInfoCall::SELECTOR => "getMatchInfo",
			Some(s) if s == ICricketBettingFactory::getActiveGamesCall::SELECTOR => "getActiveGames",
			_ => "call",
		};
		if state.peek_fault(function) == Some(Fault::Network) {
			state.take_fault(function);
			return Err(DeliveryError::Network(format!("connection reset during {}", function)));
		}

		self.read(&state.contracts, call)
	}

	async fn get_balance(&self, address: Address) -> Result<U256, DeliveryError> {
		Ok(self
			.state
			.lock()
			.await
			.contracts
			.balances
			.get(&address)
			.copied()
			.unwrap_or_default())
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		Ok(self.state.lock().await.block)
	}
}

/// Configuration schema for the mock ledger.
pub struct MockLedgerSchema;

impl ConfigSchema for MockLedgerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new(
				"latency_ms",
				FieldType::Integer {
					min: Some(0),
					max: Some(60_000),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create a mock ledger.
///
/// Configuration parameters:
/// - `latency_ms` (optional): delay applied to every broadcast
pub fn create_mock(
	config: &toml::Value,
	network: &NetworkConfig,
) -> Result<Box<dyn ChainClient>, DeliveryError> {
	MockLedgerSchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(format!("Invalid configuration: {}", e)))?;

	let mut ledger = MockLedger::new(network.chain_id, network.factory_address);
	if let Some(ms) = config.get("latency_ms").and_then(|v| v.as_integer()) {
		ledger = ledger.with_latency(Duration::from_millis(ms as u64));
	}
	Ok(Box::new(ledger))
}

/// Registry for the mock ledger.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "mock";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_mock
	}
}

impl DeliveryRegistry for Registry {}
