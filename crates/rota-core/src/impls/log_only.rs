use async_trait::async_trait;
use tracing::info;

use crate::app::context::TaskContext;
use crate::app::runtime::TaskBody;
use crate::domain::decision::Control;
use crate::domain::errors::Result;

/// Body for tasks whose real work lives outside the core. Logs the dispatch
/// and lets the scheduler move the task to the next cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyBody;

#[async_trait]
impl TaskBody for LogOnlyBody {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
        info!(task = %ctx.task(), "task dispatched");
        Ok(Control::Proceed)
    }
}
