//! Marketplace contract surface
//!
//! The relayer only ever talks to the fixed set of methods declared in
//! [`MARKETPLACE_ABI`]. Write calls are described by [`ContractCall`] and handed to
//! the submission pipeline; the listing query is decoded into [`Listing`]s.

mod listing;

pub use listing::{decode_listings, Listing};

use ethers::abi::{parse_abi, Abi, Function, Token};
use ethers::types::{Address, Bytes, U256};
use lazy_static::lazy_static;
use serde::Serialize;

lazy_static! {
    /// Human-readable ABI of the marketplace methods the relayer calls
    pub static ref MARKETPLACE_ABI: Abi = parse_abi(&[
        "function listItem(uint256 tokenId, uint256 price)",
        "function buyItem(uint256 itemId) payable",
        "function createListing(uint256 tokenId, uint256 price)",
        "function getItemsForSale() view returns ((uint256,string,string,uint256)[])",
    ])
    .expect("marketplace ABI is well-formed");
}

/// Marketplace methods reachable from the relayer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarketplaceMethod {
    #[serde(rename = "listItem")]
    ListItem,
    #[serde(rename = "buyItem")]
    BuyItem,
    #[serde(rename = "createListing")]
    CreateListing,
    #[serde(rename = "getItemsForSale")]
    ItemsForSale,
}

impl MarketplaceMethod {
    pub fn name(&self) -> &'static str {
        match self {
            MarketplaceMethod::ListItem => "listItem",
            MarketplaceMethod::BuyItem => "buyItem",
            MarketplaceMethod::CreateListing => "createListing",
            MarketplaceMethod::ItemsForSale => "getItemsForSale",
        }
    }

    pub fn function(&self) -> Result<&'static Function, ethers::abi::Error> {
        MARKETPLACE_ABI.function(self.name())
    }
}

/// A single call against the marketplace contract
///
/// Built once by the listing/buying flow and consumed by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    target: Address,
    method: MarketplaceMethod,
    args: Vec<Token>,
    value: U256,
}

impl ContractCall {
    pub fn new(target: Address, method: MarketplaceMethod, args: Vec<Token>) -> Self {
        Self {
            target,
            method,
            args,
            value: U256::zero(),
        }
    }

    /// `listItem(tokenId, price)`, price in wei
    pub fn list_item(target: Address, token_id: U256, price: U256) -> Self {
        Self::new(
            target,
            MarketplaceMethod::ListItem,
            vec![Token::Uint(token_id), Token::Uint(price)],
        )
    }

    /// `buyItem(itemId)`
    pub fn buy_item(target: Address, item_id: U256) -> Self {
        Self::new(target, MarketplaceMethod::BuyItem, vec![Token::Uint(item_id)])
    }

    /// `createListing(tokenId, price)`, price in wei
    pub fn create_listing(target: Address, token_id: U256, price: U256) -> Self {
        Self::new(
            target,
            MarketplaceMethod::CreateListing,
            vec![Token::Uint(token_id), Token::Uint(price)],
        )
    }

    /// `getItemsForSale()`
    pub fn items_for_sale(target: Address) -> Self {
        Self::new(target, MarketplaceMethod::ItemsForSale, Vec::new())
    }

    /// Attach wei to a payable call
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn method(&self) -> MarketplaceMethod {
        self.method
    }

    pub fn args(&self) -> &[Token] {
        &self.args
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    /// Selector plus ABI-encoded arguments
    pub fn encode(&self) -> Result<Bytes, ethers::abi::Error> {
        let encoded = self.method.function()?.encode_input(&self.args)?;
        Ok(Bytes::from(encoded))
    }
}
