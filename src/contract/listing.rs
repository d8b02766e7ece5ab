use super::MarketplaceMethod;
use crate::error::CacheReadError;

use ethers::abi::Token;
use ethers::types::U256;
use ethers::utils::format_ether;
use serde::Serialize;

/// A token offered for sale, as reported by `getItemsForSale()`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    /// Media reference (URL or content hash)
    pub image: String,
    /// Price in ETH, for display
    pub price: f64,
    pub price_wei: U256,
}

impl Listing {
    fn from_token(token: Token) -> Result<Self, CacheReadError> {
        let Token::Tuple(fields) = token else {
            return Err(CacheReadError::Decode(format!(
                "expected listing tuple, got {:?}",
                token
            )));
        };

        match fields.as_slice() {
            [Token::Uint(id), Token::String(title), Token::String(image), Token::Uint(price)] => {
                Ok(Self {
                    id: id.to_string(),
                    title: title.clone(),
                    image: image.clone(),
                    price: wei_to_eth(*price)?,
                    price_wei: *price,
                })
            }
            other => Err(CacheReadError::Decode(format!(
                "unexpected listing fields: {:?}",
                other
            ))),
        }
    }
}

fn wei_to_eth(wei: U256) -> Result<f64, CacheReadError> {
    format_ether(wei)
        .parse()
        .map_err(|e| CacheReadError::Decode(format!("price {} is not representable: {}", wei, e)))
}

/// Decode the return data of `getItemsForSale()`, preserving contract order
pub fn decode_listings(data: &[u8]) -> Result<Vec<Listing>, CacheReadError> {
    let function = MarketplaceMethod::ItemsForSale
        .function()
        .map_err(|e| CacheReadError::Decode(e.to_string()))?;

    let mut tokens = function
        .decode_output(data)
        .map_err(|e| CacheReadError::Decode(e.to_string()))?;

    match tokens.pop() {
        Some(Token::Array(items)) if tokens.is_empty() => {
            items.into_iter().map(Listing::from_token).collect()
        }
        other => Err(CacheReadError::Decode(format!(
            "expected a single listing array, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::encode;
    use ethers::utils::parse_ether;

    fn listing_token(id: u64, title: &str, price: U256) -> Token {
        Token::Tuple(vec![
            Token::Uint(U256::from(id)),
            Token::String(title.to_string()),
            Token::String(format!("ipfs://{}", id)),
            Token::Uint(price),
        ])
    }

    #[test]
    fn test_decode_listings_in_contract_order() {
        let data = encode(&[Token::Array(vec![
            listing_token(7, "Genesis", parse_ether("2.5").unwrap()),
            listing_token(1, "Second", parse_ether("0.1").unwrap()),
        ])]);

        let listings = decode_listings(&data).unwrap();

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].id, "7");
        assert_eq!(listings[0].title, "Genesis");
        assert_eq!(listings[0].image, "ipfs://7");
        assert_eq!(listings[0].price, 2.5);
        assert_eq!(listings[1].id, "1");
    }

    #[test]
    fn test_empty_sale_set() {
        let data = encode(&[Token::Array(vec![])]);
        assert!(decode_listings(&data).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = decode_listings(&[0xde, 0xad]).unwrap_err();
        assert!(matches!(err, CacheReadError::Decode(_)));
    }
}
