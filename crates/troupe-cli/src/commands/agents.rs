use console::style;

use crate::troupe::builtin_troupe;

pub fn execute() -> anyhow::Result<()> {
    println!("{}", style("Builtin troupe").bold());
    for member in builtin_troupe() {
        println!(
            "  {} ({})\n    model: {}\n    voice: {}\n    temperature: {} top_p: {}",
            style(&member.agent.name).bold(),
            member.agent.id,
            member.model_id,
            member.voice_id,
            member.agent.temperature,
            member.agent.top_p,
        );
    }
    Ok(())
}
