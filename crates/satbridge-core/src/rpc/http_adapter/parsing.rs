use bitcoin::{Amount, BlockHash, Txid};

use crate::error::CoreError;

use super::super::types::{decode_transaction_hex, RawTransaction, TxOutSetInfo};

/// Decode a verbose `getrawtransaction` result.
///
/// The transaction body comes from the `hex` field; the node's own decoding
/// is ignored. `block_height` is left for the caller to fill in when the
/// response lacks it.
pub(super) fn parse_raw_transaction(raw: &serde_json::Value) -> Result<RawTransaction, CoreError> {
    let hex = raw
        .get("hex")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidTxData("missing hex".into()))?;
    let tx = decode_transaction_hex(hex)?;

    Ok(RawTransaction {
        tx,
        hex: hex.to_owned(),
        confirmations: parse_integer_optional::<u64, false>(raw.get("confirmations")).unwrap_or(0),
        block_hash: parse_opt_block_hash(raw.get("blockhash"))?,
        block_height: parse_integer_optional::<u32, false>(raw.get("blockheight")),
        block_time: parse_integer_optional::<u64, false>(raw.get("blocktime")),
    })
}

pub(super) fn parse_tx_out_set_info(raw: &serde_json::Value) -> Result<TxOutSetInfo, CoreError> {
    let total_amount = parse_btc_amount(
        raw.get("total_amount")
            .ok_or_else(|| CoreError::InvalidTxData("missing total_amount".into()))?,
    )?;
    Ok(TxOutSetInfo {
        height: parse_integer_required::<u64, false>(raw.get("height"), "height")?,
        total_amount,
    })
}

pub(super) fn parse_txid(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Txid, CoreError> {
    let value = value
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| CoreError::InvalidTxData(format!("missing {field}")))?;
    value
        .parse()
        .map_err(|e| CoreError::InvalidTxData(format!("invalid {field}: {e}")))
}

pub(super) fn parse_opt_block_hash(
    value: Option<&serde_json::Value>,
) -> Result<Option<BlockHash>, CoreError> {
    match value.and_then(serde_json::Value::as_str) {
        None => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| CoreError::InvalidTxData(format!("invalid blockhash: {e}"))),
    }
}

pub(super) fn parse_integer_required<T, const SIGNED: bool>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<T, CoreError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    parse_integer::<T, SIGNED, true>(value, field)?
        .ok_or_else(|| CoreError::InvalidTxData(format!("missing {field}")))
}

pub(super) fn parse_integer_optional<T, const SIGNED: bool>(
    value: Option<&serde_json::Value>,
) -> Option<T>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    parse_integer::<T, SIGNED, false>(value, "value")
        .ok()
        .flatten()
}

// `REQUIRED=false` treats missing/null/type-mismatch as `Ok(None)`.
fn parse_integer<T, const SIGNED: bool, const REQUIRED: bool>(
    value: Option<&serde_json::Value>,
    field: &str,
) -> Result<Option<T>, CoreError>
where
    T: TryFrom<i64> + TryFrom<u64>,
{
    let missing_or_none = || {
        if REQUIRED {
            Err(CoreError::InvalidTxData(format!("missing {field}")))
        } else {
            Ok(None)
        }
    };

    let Some(value) = value else {
        return missing_or_none();
    };

    if SIGNED {
        let Some(n) = value.as_i64() else {
            return missing_or_none();
        };
        T::try_from(n)
            .map(Some)
            .map_err(|_| CoreError::InvalidTxData(format!("{field} out of range: {n}")))
    } else {
        let Some(n) = value.as_u64() else {
            return missing_or_none();
        };
        T::try_from(n)
            .map(Some)
            .map_err(|_| CoreError::InvalidTxData(format!("{field} out of range: {n}")))
    }
}

/// Parse a BTC amount from a JSON value.
///
/// Numbers go through `Amount::from_float_in` so scientific notation works;
/// strings go through `Amount::from_str_in`.
pub(super) fn parse_btc_amount(value: &serde_json::Value) -> Result<Amount, CoreError> {
    match value {
        serde_json::Value::Number(n) => {
            let parsed = n
                .as_f64()
                .ok_or_else(|| CoreError::InvalidTxData(format!("invalid BTC amount `{value}`")))?;
            Amount::from_float_in(parsed, bitcoin::Denomination::Bitcoin)
                .map_err(|e| CoreError::InvalidTxData(format!("invalid BTC amount `{value}`: {e}")))
        }
        serde_json::Value::String(s) => Amount::from_str_in(s, bitcoin::Denomination::Bitcoin)
            .map_err(|e| CoreError::InvalidTxData(format!("invalid BTC amount `{s}`: {e}"))),
        _ => Err(CoreError::InvalidTxData(format!(
            "expected numeric BTC amount, got: {value}"
        ))),
    }
}
