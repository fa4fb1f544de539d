use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{IntentKind, TransactionIntent, TxRequest};
use crate::retry::retry_async;
use crate::rpc::{parse_hex_bytes, parse_hex_quantity, to_hex_bytes, EvmRpcClient};

/// Idle (unstaked) wallet balances, in asset units.
#[derive(Debug, Clone, Copy)]
pub struct IdleBalances {
    pub btc: f64,
    pub usdc: f64,
}

/// Assets the venue's contracts pull from the wallet. The router spends
/// Btc/Usdc/Reward; the gauge spends Lp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueAsset {
    Btc,
    Usdc,
    Reward,
    Lp,
}

/// DEX + gauge collaborator. The core only needs balance reads and
/// ready-to-sign transaction intents; routing math and ABI details stay
/// behind this seam.
#[async_trait]
pub trait Venue: Send + Sync {
    async fn idle_balances(&self) -> Result<IdleBalances>;
    async fn lp_balance(&self) -> Result<f64>;
    /// Accrued reward-token emissions claimable from the gauge.
    async fn pending_rewards(&self) -> Result<f64>;

    /// Approval the spender contract still needs before `amount` of `asset`
    /// can be pulled from the wallet; `None` when the current allowance
    /// already covers it. Callers submit the returned intent ahead of the
    /// write it unblocks.
    async fn approval_intent(
        &self,
        asset: VenueAsset,
        amount: f64,
    ) -> Result<Option<TransactionIntent>>;

    fn swap_usdc_for_btc(
        &self,
        usdc_amount: f64,
        min_btc_out: f64,
        deadline: DateTime<Utc>,
    ) -> TransactionIntent;
    fn add_liquidity(
        &self,
        btc_amount: f64,
        usdc_amount: f64,
        deadline: DateTime<Utc>,
    ) -> TransactionIntent;
    fn stake_lp(&self, lp_amount: f64) -> TransactionIntent;
    fn claim_rewards(&self) -> TransactionIntent;
    fn swap_rewards_for_btc(&self, reward_amount: f64, deadline: DateTime<Utc>) -> TransactionIntent;
}

pub const BTC_DECIMALS: u32 = 8;
pub const USDC_DECIMALS: u32 = 6;
pub const LP_DECIMALS: u32 = 18;
pub const REWARD_DECIMALS: u32 = 18;

// Function selectors; signatures noted alongside.
const SEL_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31]; // balanceOf(address)
const SEL_ALLOWANCE: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e]; // allowance(address,address)
const SEL_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3]; // approve(address,uint256)
const SEL_EARNED: [u8; 4] = [0x00, 0x8c, 0xc2, 0x62]; // earned(address)
const SEL_SWAP_EXACT: [u8; 4] = [0x38, 0xed, 0x17, 0x39]; // swapExactTokensForTokens(uint256,uint256,address[],address,uint256)
const SEL_ADD_LIQUIDITY: [u8; 4] = [0xe8, 0xe3, 0x37, 0x00]; // addLiquidity(address,address,uint256,uint256,uint256,uint256,address,uint256)
const SEL_DEPOSIT: [u8; 4] = [0xb6, 0xb5, 0x5f, 0x25]; // deposit(uint256)
const SEL_GET_REWARD: [u8; 4] = [0x3d, 0x18, 0xb9, 0x12]; // getReward()

const GAS_LIMIT_APPROVE: u64 = 60_000;
const GAS_LIMIT_SWAP: u64 = 300_000;
const GAS_LIMIT_ADD_LIQUIDITY: u64 = 400_000;
const GAS_LIMIT_STAKE: u64 = 200_000;
const GAS_LIMIT_CLAIM: u64 = 150_000;

#[derive(Debug, Clone)]
pub struct VenueAddresses {
    pub btc_token: String,
    pub usdc_token: String,
    pub reward_token: String,
    pub router: String,
    pub gauge: String,
    pub lp_token: String,
}

/// V2-style AMM router plus a Synthetix-style staking gauge.
pub struct RouterVenue {
    rpc: EvmRpcClient,
    wallet: String,
    addresses: VenueAddresses,
}

impl RouterVenue {
    pub fn new(rpc: EvmRpcClient, wallet: String, addresses: VenueAddresses) -> Self {
        Self {
            rpc,
            wallet,
            addresses,
        }
    }

    async fn token_balance(&self, token: &str, decimals: u32) -> Result<f64> {
        let mut data = SEL_BALANCE_OF.to_vec();
        data.extend_from_slice(&word_address(&self.wallet)?);
        let result = self.rpc.eth_call(token, &to_hex_bytes(&data)).await?;
        let raw = parse_hex_quantity(&result)?;
        Ok(from_base_units(raw, decimals))
    }

    async fn allowance(&self, token: &str, spender: &str) -> Result<u128> {
        let mut data = SEL_ALLOWANCE.to_vec();
        data.extend_from_slice(&word_address(&self.wallet)?);
        data.extend_from_slice(&word_address(spender)?);
        let call_data = to_hex_bytes(&data);
        let rpc = self.rpc.clone();
        let token = token.to_string();
        let result = retry_async(
            move |_| {
                let rpc = rpc.clone();
                let token = token.clone();
                let data = call_data.clone();
                async move { rpc.eth_call(&token, &data).await }
            },
            3,
            Duration::from_millis(200),
        )
        .await?;
        Ok(parse_allowance(&result))
    }

    fn approve(
        &self,
        token: &str,
        spender: &str,
        units: u128,
        amount: f64,
        asset: &str,
    ) -> Result<TransactionIntent> {
        let mut data = SEL_APPROVE.to_vec();
        data.extend_from_slice(&word_address(spender)?);
        data.extend_from_slice(&word_u128(units));
        Ok(self.intent(
            IntentKind::Approve,
            amount,
            asset,
            0.0,
            None,
            token.to_string(),
            data,
            GAS_LIMIT_APPROVE,
        ))
    }

    fn intent(
        &self,
        kind: IntentKind,
        input_amount: f64,
        input_asset: &str,
        min_output: f64,
        deadline: Option<DateTime<Utc>>,
        to: String,
        data: Vec<u8>,
        gas_limit: u64,
    ) -> TransactionIntent {
        TransactionIntent {
            kind,
            input_amount,
            input_asset: input_asset.to_string(),
            min_output,
            deadline,
            builder: Box::new(move |nonce, gas_price| TxRequest {
                to: to.clone(),
                value: 0,
                data: data.clone(),
                nonce,
                gas_price,
                gas_limit,
            }),
        }
    }

    fn swap_calldata(
        &self,
        amount_in: u128,
        min_out: u128,
        path: &[&str],
        deadline: DateTime<Utc>,
    ) -> Vec<u8> {
        let mut data = SEL_SWAP_EXACT.to_vec();
        data.extend_from_slice(&word_u128(amount_in));
        data.extend_from_slice(&word_u128(min_out));
        // dynamic array offset: 5 head words
        data.extend_from_slice(&word_u128(5 * 32));
        data.extend_from_slice(&word_address(&self.wallet).unwrap_or([0u8; 32]));
        data.extend_from_slice(&word_u128(deadline.timestamp().max(0) as u128));
        data.extend_from_slice(&word_u128(path.len() as u128));
        for hop in path {
            data.extend_from_slice(&word_address(hop).unwrap_or([0u8; 32]));
        }
        data
    }
}

#[async_trait]
impl Venue for RouterVenue {
    async fn idle_balances(&self) -> Result<IdleBalances> {
        let btc = self
            .token_balance(&self.addresses.btc_token, BTC_DECIMALS)
            .await?;
        let usdc = self
            .token_balance(&self.addresses.usdc_token, USDC_DECIMALS)
            .await?;
        Ok(IdleBalances { btc, usdc })
    }

    async fn lp_balance(&self) -> Result<f64> {
        self.token_balance(&self.addresses.lp_token, LP_DECIMALS)
            .await
    }

    async fn pending_rewards(&self) -> Result<f64> {
        let mut data = SEL_EARNED.to_vec();
        data.extend_from_slice(&word_address(&self.wallet)?);
        let result = self
            .rpc
            .eth_call(&self.addresses.gauge, &to_hex_bytes(&data))
            .await?;
        let raw = parse_hex_quantity(&result)?;
        Ok(from_base_units(raw, REWARD_DECIMALS))
    }

    async fn approval_intent(
        &self,
        asset: VenueAsset,
        amount: f64,
    ) -> Result<Option<TransactionIntent>> {
        let a = &self.addresses;
        let (token, decimals, label) = match asset {
            VenueAsset::Btc => (a.btc_token.as_str(), BTC_DECIMALS, "cbBTC"),
            VenueAsset::Usdc => (a.usdc_token.as_str(), USDC_DECIMALS, "USDC"),
            VenueAsset::Reward => (a.reward_token.as_str(), REWARD_DECIMALS, "AERO"),
            VenueAsset::Lp => (a.lp_token.as_str(), LP_DECIMALS, "LP"),
        };
        let spender = match asset {
            VenueAsset::Lp => a.gauge.as_str(),
            _ => a.router.as_str(),
        };
        let needed = to_base_units(amount, decimals);
        if self.allowance(token, spender).await? >= needed {
            return Ok(None);
        }
        Ok(Some(self.approve(token, spender, needed, amount, label)?))
    }

    fn swap_usdc_for_btc(
        &self,
        usdc_amount: f64,
        min_btc_out: f64,
        deadline: DateTime<Utc>,
    ) -> TransactionIntent {
        let data = self.swap_calldata(
            to_base_units(usdc_amount, USDC_DECIMALS),
            to_base_units(min_btc_out, BTC_DECIMALS),
            &[&self.addresses.usdc_token, &self.addresses.btc_token],
            deadline,
        );
        self.intent(
            IntentKind::Swap,
            usdc_amount,
            "USDC",
            min_btc_out,
            Some(deadline),
            self.addresses.router.clone(),
            data,
            GAS_LIMIT_SWAP,
        )
    }

    fn add_liquidity(
        &self,
        btc_amount: f64,
        usdc_amount: f64,
        deadline: DateTime<Utc>,
    ) -> TransactionIntent {
        let btc_units = to_base_units(btc_amount, BTC_DECIMALS);
        let usdc_units = to_base_units(usdc_amount, USDC_DECIMALS);
        let mut data = SEL_ADD_LIQUIDITY.to_vec();
        data.extend_from_slice(&word_address(&self.addresses.btc_token).unwrap_or([0u8; 32]));
        data.extend_from_slice(&word_address(&self.addresses.usdc_token).unwrap_or([0u8; 32]));
        data.extend_from_slice(&word_u128(btc_units));
        data.extend_from_slice(&word_u128(usdc_units));
        // 1% tolerance on both legs
        data.extend_from_slice(&word_u128(btc_units - btc_units / 100));
        data.extend_from_slice(&word_u128(usdc_units - usdc_units / 100));
        data.extend_from_slice(&word_address(&self.wallet).unwrap_or([0u8; 32]));
        data.extend_from_slice(&word_u128(deadline.timestamp().max(0) as u128));

        self.intent(
            IntentKind::AddLiquidity,
            usdc_amount,
            "USDC",
            0.0,
            Some(deadline),
            self.addresses.router.clone(),
            data,
            GAS_LIMIT_ADD_LIQUIDITY,
        )
    }

    fn stake_lp(&self, lp_amount: f64) -> TransactionIntent {
        let mut data = SEL_DEPOSIT.to_vec();
        data.extend_from_slice(&word_u128(to_base_units(lp_amount, LP_DECIMALS)));
        self.intent(
            IntentKind::StakeLp,
            lp_amount,
            "LP",
            0.0,
            None,
            self.addresses.gauge.clone(),
            data,
            GAS_LIMIT_STAKE,
        )
    }

    fn claim_rewards(&self) -> TransactionIntent {
        self.intent(
            IntentKind::ClaimRewards,
            0.0,
            "AERO",
            0.0,
            None,
            self.addresses.gauge.clone(),
            SEL_GET_REWARD.to_vec(),
            GAS_LIMIT_CLAIM,
        )
    }

    fn swap_rewards_for_btc(
        &self,
        reward_amount: f64,
        deadline: DateTime<Utc>,
    ) -> TransactionIntent {
        let data = self.swap_calldata(
            to_base_units(reward_amount, REWARD_DECIMALS),
            0,
            &[
                &self.addresses.reward_token,
                &self.addresses.usdc_token,
                &self.addresses.btc_token,
            ],
            deadline,
        );
        self.intent(
            IntentKind::Swap,
            reward_amount,
            "AERO",
            0.0,
            Some(deadline),
            self.addresses.router.clone(),
            data,
            GAS_LIMIT_SWAP,
        )
    }
}

/// eth_call returns a 32-byte quantity; anything beyond u128 is effectively
/// unlimited for our purposes.
fn parse_allowance(hex: &str) -> u128 {
    let digits = hex.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return 0;
    }
    if digits.len() > 32 {
        return u128::MAX;
    }
    u128::from_str_radix(digits, 16).unwrap_or(0)
}

pub fn to_base_units(amount: f64, decimals: u32) -> u128 {
    (amount * 10f64.powi(decimals as i32)).round().max(0.0) as u128
}

pub fn from_base_units(raw: u128, decimals: u32) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

fn word_u128(v: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&v.to_be_bytes());
    word
}

fn word_address(addr: &str) -> Result<[u8; 32]> {
    let bytes = parse_hex_bytes(addr)?;
    if bytes.len() != 20 {
        return Err(anyhow!("bad address length: {addr}"));
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}
