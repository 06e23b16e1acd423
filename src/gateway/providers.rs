//! Builtin providers.
//!
//! Each is an [`OpenAiCompatClient`] with its own base URL, credentials and
//! message layout. Keys and default models come from the environment unless
//! overridden through [`ClientOptions`].

use std::time::Duration;

use serde_json::json;

use super::error::ProviderError;
use super::openai_compat::OpenAiCompatClient;
use super::types::{ClientOptions, ImageEncoding, ImagePlacement, RequestShape};
use super::{ChatClient, ClientFactory};

pub const AIHUBMIX: &str = "aihubmix";
pub const LMSTUDIO: &str = "lmstudio";
pub const BIGMODEL: &str = "bigmodel";
pub const ALIYUN: &str = "aliyun";

const AIHUBMIX_BASE_URL: &str = "https://aihubmix.com/v1";
const LMSTUDIO_BASE_URL: &str = "http://192.168.1.2:1234/v1";
const BIGMODEL_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const ALIYUN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

const LMSTUDIO_DEFAULT_MODEL: &str = "local-model";
const BIGMODEL_DEFAULT_MODEL: &str = "glm-4.5v";
const ALIYUN_DEFAULT_MODEL: &str = "qwen2.5-vl-32b-instruct";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub(super) fn register_builtin(factory: &mut ClientFactory) {
    factory.register(AIHUBMIX, |model, opts| Ok(Box::new(aihubmix(model, opts)?) as Box<dyn ChatClient>));
    factory.register(LMSTUDIO, |model, opts| Ok(Box::new(lmstudio(model, opts)?) as Box<dyn ChatClient>));
    factory.register(BIGMODEL, |model, opts| Ok(Box::new(bigmodel(model, opts)?) as Box<dyn ChatClient>));
    factory.register(ALIYUN, |model, opts| Ok(Box::new(aliyun(model, opts)?) as Box<dyn ChatClient>));
}

/// AiHubMix: OpenAI-compatible aggregator. Text part first, image as data URI.
pub fn aihubmix(model: &str, opts: &ClientOptions) -> Result<OpenAiCompatClient, ProviderError> {
    if model.trim().is_empty() {
        return Err(ProviderError::config("aihubmix requires a model name"));
    }
    let api_key = required_key(opts, "AIHUBMIX_API_KEY")?;
    let shape = RequestShape {
        image_placement: ImagePlacement::AfterText,
        temperature: opts.temperature,
        max_tokens: opts.max_tokens,
        ..RequestShape::default()
    };
    OpenAiCompatClient::new(
        AIHUBMIX,
        model,
        base_url(opts, "AIHUBMIX_BASE_URL", AIHUBMIX_BASE_URL),
        Some(&api_key),
        timeout(opts),
        shape,
    )
}

/// LM Studio on the local network. No authentication.
pub fn lmstudio(model: &str, opts: &ClientOptions) -> Result<OpenAiCompatClient, ProviderError> {
    let model = non_empty_or(model, LMSTUDIO_DEFAULT_MODEL.to_string());
    let shape = RequestShape {
        image_placement: ImagePlacement::BeforeText,
        plain_text_when_no_image: false,
        temperature: Some(opts.temperature.unwrap_or(0.1)),
        max_tokens: Some(opts.max_tokens.unwrap_or(8192)),
        ..RequestShape::default()
    };
    OpenAiCompatClient::new(
        LMSTUDIO,
        model,
        base_url(opts, "LMSTUDIO_BASE_URL", LMSTUDIO_BASE_URL),
        None,
        timeout(opts),
        shape,
    )
}

/// BigModel (Zhipu). Image goes as a bare base64 payload and thinking is enabled.
pub fn bigmodel(model: &str, opts: &ClientOptions) -> Result<OpenAiCompatClient, ProviderError> {
    let model = non_empty_or(model, env_or("BIGMODEL_MODEL_NAME", BIGMODEL_DEFAULT_MODEL));
    let api_key = required_key(opts, "BIGMODEL_API_KEY")?;

    let mut extra = serde_json::Map::new();
    extra.insert("thinking".to_string(), json!({ "type": "enabled" }));

    let shape = RequestShape {
        image_placement: ImagePlacement::AfterText,
        image_encoding: ImageEncoding::RawBase64,
        plain_text_when_no_image: false,
        temperature: opts.temperature,
        max_tokens: opts.max_tokens,
        extra_body: Some(extra),
        ..RequestShape::default()
    };
    OpenAiCompatClient::new(
        BIGMODEL,
        model,
        base_url(opts, "BIGMODEL_BASE_URL", BIGMODEL_BASE_URL),
        Some(&api_key),
        timeout(opts),
        shape,
    )
}

/// Aliyun DashScope compatible mode. Fixed system prompt, image before text.
pub fn aliyun(model: &str, opts: &ClientOptions) -> Result<OpenAiCompatClient, ProviderError> {
    let model = non_empty_or(model, env_or("ALIYUN_MODEL_NAME", ALIYUN_DEFAULT_MODEL));
    let api_key = required_key(opts, "ALIYUN_API_KEY")?;
    let shape = RequestShape {
        image_placement: ImagePlacement::BeforeText,
        system_prompt: Some("You are a helpful assistant."),
        temperature: opts.temperature,
        max_tokens: opts.max_tokens,
        ..RequestShape::default()
    };
    OpenAiCompatClient::new(
        ALIYUN,
        model,
        base_url(opts, "ALIYUN_BASE_URL", ALIYUN_BASE_URL),
        Some(&api_key),
        timeout(opts),
        shape,
    )
}

fn required_key(opts: &ClientOptions, env: &str) -> Result<String, ProviderError> {
    opts.api_key
        .clone()
        .or_else(|| std::env::var(env).ok())
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ProviderError::config(format!("{env} not set")))
}

fn base_url(opts: &ClientOptions, env: &str, default: &str) -> String {
    opts.base_url
        .clone()
        .or_else(|| std::env::var(env).ok())
        .unwrap_or_else(|| default.to_string())
}

fn timeout(opts: &ClientOptions) -> Duration {
    opts.timeout.unwrap_or_else(|| {
        std::env::var("VLM_EVAL_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    })
}

fn env_or(env: &str, default: &str) -> String {
    std::env::var(env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn non_empty_or(model: &str, fallback: String) -> String {
    if model.trim().is_empty() {
        fallback
    } else {
        model.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lmstudio_defaults() {
        let client = lmstudio("", &ClientOptions::new().base_url("http://127.0.0.1:9/v1")).unwrap();
        assert_eq!(client.model_name(), LMSTUDIO_DEFAULT_MODEL);
        assert_eq!(client.shape().max_tokens, Some(8192));
        assert_eq!(client.shape().temperature, Some(0.1));
        assert_eq!(client.shape().image_placement, ImagePlacement::BeforeText);
    }

    #[test]
    fn test_explicit_key_beats_environment() {
        let client = aliyun("qwen-vl-max", &ClientOptions::new().api_key("sk-explicit")).unwrap();
        assert_eq!(client.model_name(), "qwen-vl-max");
        assert_eq!(client.base_url(), ALIYUN_BASE_URL);
        assert_eq!(client.shape().system_prompt, Some("You are a helpful assistant."));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        for env in ["AIHUBMIX_API_KEY", "BIGMODEL_API_KEY", "ALIYUN_API_KEY"] {
            std::env::remove_var(env);
        }
        let opts = ClientOptions::new();
        let cases = [
            (aihubmix("gpt-4o", &opts).unwrap_err(), "AIHUBMIX_API_KEY not set"),
            (bigmodel("glm-4.5v", &opts).unwrap_err(), "BIGMODEL_API_KEY not set"),
            (aliyun("qwen-vl-max", &opts).unwrap_err(), "ALIYUN_API_KEY not set"),
        ];
        for (err, message) in cases {
            assert!(err.is_config());
            assert!(err.to_string().contains(message), "{err}");
        }

        // A blank explicit key is as good as none.
        let err = aliyun("qwen-vl-max", &ClientOptions::new().api_key("  ")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_aihubmix_requires_model() {
        let err = aihubmix("  ", &ClientOptions::new().api_key("sk")).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_bigmodel_shape() {
        let client = bigmodel("glm-4.5v", &ClientOptions::new().api_key("k")).unwrap();
        assert_eq!(client.shape().image_encoding, ImageEncoding::RawBase64);
        let extra = client.shape().extra_body.as_ref().unwrap();
        assert_eq!(extra["thinking"]["type"], "enabled");
    }
}
