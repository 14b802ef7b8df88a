use anyhow::{Result, bail};

use planstream::client::{SessionStatus, fetch};
use planstream::stream::StreamEvent;

/// Submit a topic and print the stream as it arrives.
pub async fn run(url: &str, topic: &str) -> Result<()> {
    println!("Generating plan for \"{topic}\"...");

    let session = fetch(url, topic, |event| match event {
        StreamEvent::Log { text } => println!("  {text}"),
        StreamEvent::Result { .. } => println!("  (plan received)"),
        StreamEvent::Done => {}
        StreamEvent::Failure { exit_code, message } => {
            eprintln!("  worker failure (exit code {exit_code}): {message}");
        }
    })
    .await?;

    match session.status {
        SessionStatus::Ready => {
            let plan = session
                .plan
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("ready session without a plan"))?;
            println!("\nPlan {} ({})", plan.id, plan.topic);
            for module in &plan.modules {
                println!("  {}. {}", module.step_number, module.title);
                println!("     article: {} ({})", module.article.title, module.article.link);
                for (category, video) in &module.videos {
                    println!("     video [{category}]: {} ({})", video.title, video.link);
                }
            }
            Ok(())
        }
        SessionStatus::Errored { reason } => bail!("generation failed: {reason}"),
        other => bail!("stream ended in unexpected state {other:?}"),
    }
}
