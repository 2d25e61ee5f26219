//! Generative fallback for the bot.
//!
//! Context retrieval is a linear substring scan over the whole catalog, capped at a handful of
//! products. That is fine for a small storefront; a large catalog would need an index.

use crate::core::bot::HUMAN_HANDOFF_ANSWER;
use crate::core::error::{ChatError, ChatResult};
use crate::core::traits::AiAdapter;
use crate::infrastructure::config::ChatConfig;
use crate::infrastructure::entities::Product;
use crate::infrastructure::traits::{CatalogRepository, GenerationBackend};
use async_trait::async_trait;
use di::{Ref, injectable};
use log::warn;
use minijinja::{Environment, context};

const MAX_CONTEXT_PRODUCTS: usize = 5;
const MIN_TOKEN_CHARS: usize = 4;

const STORE_POLICIES: &[&str] = &[
    "Miễn phí vận chuyển cho đơn hàng từ 500.000đ; đơn nhỏ hơn phí ship 30.000đ.",
    "Đổi trả trong vòng 7 ngày kể từ khi nhận hàng nếu sản phẩm còn nguyên tem, chưa sử dụng.",
    "Thanh toán: COD (thanh toán khi nhận hàng), chuyển khoản ngân hàng, ví MoMo, VNPay.",
    "Thời gian giao hàng: 1-2 ngày nội thành, 3-5 ngày các tỉnh khác.",
    "Hotline 1900 6868, hoạt động 8:00 - 22:00 mỗi ngày.",
];

const PROMPT_TEMPLATE: &str = r#"Bạn là trợ lý tư vấn của một cửa hàng mỹ phẩm trực tuyến.
Bạn CHỈ trả lời các câu hỏi về mỹ phẩm, chăm sóc da, sản phẩm của cửa hàng, đơn hàng, vận chuyển, thanh toán và chính sách đổi trả.
Nếu câu hỏi nằm ngoài phạm vi trên, hãy trả lời đúng một câu: "Xin lỗi, mình chỉ có thể hỗ trợ các câu hỏi về sản phẩm làm đẹp và đơn hàng của cửa hàng."
Không bịa đặt thông tin sản phẩm, giá hoặc chính sách không có trong dữ liệu dưới đây.
Nếu khách hàng cần nhân viên xử lý trực tiếp (khiếu nại, hoàn tiền, sự cố với một đơn hàng cụ thể), chỉ trả lời đúng một từ: {{ handoff }}
Trả lời ngắn gọn, thân thiện, bằng tiếng Việt, chỉ dùng văn bản thuần (không Markdown, không HTML).

### Dữ liệu cửa hàng
{% if products %}Sản phẩm liên quan:
{% for product in products %}- {{ product.name }} ({{ product.price }}đ){% if product.description %}: {{ product.description }}{% endif %}
{% endfor %}{% endif %}
{% if categories %}Danh mục: {{ categories | join(", ") }}
{% endif %}{% if brands %}Thương hiệu: {{ brands | join(", ") }}
{% endif %}Chính sách:
{% for policy in policies %}- {{ policy }}
{% endfor %}
### Câu hỏi của khách hàng
{{ message }}
"#;

fn message_tokens(message: &str) -> Vec<String> {
    message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_owned)
        .collect()
}

/// Products whose name or description shares a token longer than three characters with the
/// message, in either containment direction. At most five, in catalog order.
pub fn relevant_products<'a>(message: &str, products: &'a [Product]) -> Vec<&'a Product> {
    let tokens = message_tokens(message);
    if tokens.is_empty() {
        return Vec::new();
    }

    products
        .iter()
        .filter(|product| {
            let name = product.name.to_lowercase();
            let description = product
                .description
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            tokens.iter().any(|token| {
                name.contains(token.as_str())
                    || description.contains(token.as_str())
                    || (!name.is_empty() && token.contains(name.as_str()))
            })
        })
        .take(MAX_CONTEXT_PRODUCTS)
        .collect()
}

pub fn render_prompt(
    message: &str,
    products: &[&Product],
    categories: &[String],
    brands: &[String],
) -> ChatResult<String> {
    let products: Vec<minijinja::Value> = products
        .iter()
        .map(|p| {
            context! {
                name => p.name,
                price => p.price,
                description => p.description,
            }
        })
        .collect();

    let mut env = Environment::new();
    env.add_template("prompt", PROMPT_TEMPLATE)
        .map_err(|e| ChatError::Upstream(format!("bad prompt template: {e}")))?;

    env.get_template("prompt")
        .and_then(|template| {
            template.render(context! {
                products => products,
                categories => categories,
                brands => brands,
                policies => STORE_POLICIES,
                handoff => HUMAN_HANDOFF_ANSWER,
                message => message,
            })
        })
        .map_err(|e| ChatError::Upstream(format!("prompt render failed: {e}")))
}

#[injectable(AiAdapter)]
pub struct RagAiAdapter {
    config: Ref<ChatConfig>,
    catalog: Ref<dyn CatalogRepository>,
    backend: Ref<dyn GenerationBackend>,
}

impl RagAiAdapter {
    async fn build_prompt(&self, message: &str) -> ChatResult<String> {
        // A catalog outage degrades the context; the policy facts are still worth sending.
        let products = self.catalog.list_products().await.unwrap_or_else(|e| {
            warn!("catalog unavailable for AI context: {e}");
            Vec::new()
        });
        let categories = self.catalog.list_category_names().await.unwrap_or_default();
        let brands = self.catalog.list_brand_names().await.unwrap_or_default();

        let relevant = relevant_products(message, &products);
        render_prompt(message, &relevant, &categories, &brands)
    }
}

#[async_trait]
impl AiAdapter for RagAiAdapter {
    fn is_available(&self) -> bool {
        self.backend.is_configured()
    }

    async fn generate_reply(&self, message: &str) -> ChatResult<String> {
        let prompt = self.build_prompt(message).await?;
        let timeout = self.config.ai_timeout;

        match tokio::time::timeout(timeout, self.backend.generate(&prompt)).await {
            Ok(result) => result.map(|text| text.trim().to_owned()),
            Err(_) => Err(ChatError::Timeout(timeout)),
        }
    }
}
