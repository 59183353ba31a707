use crate::context::AppContext;
use crate::error::RelayGateError;
use crate::types::{ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, Message};
use crate::Result;
use tracing::{debug, info};

/// 路由文本生成请求到对应的 LLM 后端
pub async fn route_generate(ctx: &AppContext, req: &GenerateRequest) -> Result<GenerateResponse> {
    req.validate().map_err(RelayGateError::BadRequest)?;

    // 先解析后端，未配置时不发出任何请求
    let backend = ctx.llm.resolve(&req.provider)?;
    let opts = req.options();
    let model = opts.model_or(backend.default_model()).to_string();

    debug!("generate -> {} ({}, model {})", req.provider, backend.vendor(), model);
    let text = backend.generate(&req.prompt, &opts).await?;

    Ok(GenerateResponse {
        text,
        provider: req.provider.clone(),
        model: Some(model),
    })
}

/// 路由聊天请求；`save_to_db` 时把助手回复追加到消息序列后整体保存
pub async fn route_chat(ctx: &AppContext, req: ChatRequest) -> Result<ChatResponse> {
    req.validate().map_err(RelayGateError::BadRequest)?;

    let backend = ctx.llm.resolve(&req.provider)?;
    let store = if req.save_to_db {
        let db_key = req.db_type.as_deref().unwrap_or(&ctx.default_database);
        Some(ctx.databases.resolve(db_key)?)
    } else {
        None
    };

    let opts = req.options();
    let model = opts.model_or(backend.default_model()).to_string();

    debug!(
        "chat -> {} ({}, model {}, {} messages)",
        req.provider,
        backend.vendor(),
        model,
        req.messages.len()
    );
    let reply = backend.chat(&req.messages, &opts).await?;

    let conversation_id = match store {
        Some(store) => {
            let mut messages = req.messages;
            messages.push(Message::assistant(reply.clone()));
            let id = store
                .save_conversation(&req.user_id, &req.provider, &messages)
                .await?;
            info!("会话已保存: {} (user {}, {})", id, req.user_id, store.kind());
            Some(id)
        }
        None => None,
    };

    Ok(ChatResponse {
        message: reply,
        provider: req.provider,
        conversation_id,
        model: Some(model),
    })
}
