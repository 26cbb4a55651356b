use crate::error::{DqError, DqResult};
use crate::DeployJob;
use redis::RedisResult;
use std::borrow::Cow;

pub fn decode_job(payload: &str) -> DqResult<DeployJob> {
    serde_json::from_str(payload).map_err(|_err| DqError::InvalidJobData(payload.into()))
}

pub fn encode_job(job: &DeployJob) -> DqResult<String> {
    serde_json::to_string(job).map_err(DqError::SerializeJob)
}

/// A reply element that should be text, as the scripts return status words.
pub(crate) fn read_redis_value_as_str<'a>(
    v: Option<&'a redis::Value>,
    err_desc: &'static str,
) -> RedisResult<Cow<'a, str>> {
    match v.ok_or_else(|| missing_value(err_desc))? {
        redis::Value::Data(d) => Ok(String::from_utf8_lossy(d.as_slice())),
        redis::Value::Status(s) => Ok(Cow::Borrowed(s.as_str())),
        other => Err(invalid_value_type(err_desc, other)),
    }
}

/// Lua numbers come back as integers, ids read from hashes as bulk strings.
pub(crate) fn read_redis_value_as_int(
    v: Option<&redis::Value>,
    err_desc: &'static str,
) -> RedisResult<i64> {
    match v.ok_or_else(|| missing_value(err_desc))? {
        redis::Value::Int(i) => Ok(*i),
        redis::Value::Data(d) => String::from_utf8_lossy(d.as_slice())
            .parse::<i64>()
            .map_err(|err| {
                redis::RedisError::from((
                    redis::ErrorKind::ResponseError,
                    err_desc,
                    err.to_string(),
                ))
            }),
        other => Err(invalid_value_type(err_desc, other)),
    }
}

fn missing_value(err_desc: &'static str) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::ResponseError, err_desc))
}

pub(crate) fn invalid_value_type(err_desc: &'static str, v: &redis::Value) -> redis::RedisError {
    redis::RedisError::from((
        redis::ErrorKind::ResponseError,
        err_desc,
        format!("{v:?}"),
    ))
}
