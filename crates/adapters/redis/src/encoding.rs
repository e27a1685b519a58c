//! 缓存值在 Redis 哈希中的布局
//!
//! 每个逻辑键是一个哈希：字段 `t` 保存类型标签，字段 `v` 保存负载。
//! 计数器用 `HINCRBY key v` 递增，所以标签和值可以原子地保存在一起。

use taa_common::{CacheValue, CodecError, ValueTag};

pub(crate) const TAG_FIELD: &str = "t";
pub(crate) const VALUE_FIELD: &str = "v";

/// 从 `HMGET key t v` 的结果解码
///
/// 两个字段都不存在表示未命中；只存在一个视为损坏。
pub(crate) fn decode_fields(
    tag: Option<String>,
    payload: Option<String>,
) -> Result<Option<CacheValue>, CodecError> {
    match (tag, payload) {
        (None, None) => Ok(None),
        (Some(tag), Some(payload)) => {
            let tag = tag.trim().parse::<u8>().map_err(|_| CodecError::UnknownTag(0))?;
            Ok(Some(CacheValue::decode(ValueTag::try_from(tag)?, &payload)?))
        }
        // 计数器可能只有 v（HSETNX 之前被其他客户端写入）
        (None, Some(payload)) => Ok(Some(CacheValue::decode(ValueTag::Integer, &payload)?)),
        (Some(_), None) => Ok(None),
    }
}
