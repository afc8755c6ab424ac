use super::{cancel_on_interrupt, proxy_address_parser};
use crate::{
    config::Config,
    http::{ReqwestTransport, USER_AGENT},
    process::SystemRunner,
    tools::{ResolvedTool, ToolResolver, ToolRole},
    utils,
};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use reqwest::Proxy;
use std::sync::Arc;

/// Resolve MP4Box (and optionally ffmpeg), downloading a bundle when no usable system copy exists.
#[derive(Debug, Clone, Args)]
pub struct Tools {
    /// Also resolve the subtitle converter (ffmpeg).
    #[arg(long)]
    pub converter: bool,

    /// Set http(s) / socks proxy address for requests.
    #[arg(long, help_heading = "Client Options", value_parser = proxy_address_parser)]
    pub proxy: Option<Proxy>,
}

impl Tools {
    pub async fn execute(self, config: Config) -> Result<()> {
        let transport = Arc::new(ReqwestTransport::new(
            self.proxy,
            USER_AGENT,
            config.request_timeout,
            config.bundle_timeout,
        )?);
        println!("{} {}", "Tools directory:".dimmed(), config.tools_dir.to_string_lossy());

        let resolver = ToolResolver::new(
            Arc::new(config),
            transport,
            Arc::new(SystemRunner),
            cancel_on_interrupt(),
        );

        print_tool(resolver.resolve_role(ToolRole::Muxer).await?);

        if self.converter {
            print_tool(resolver.resolve_role(ToolRole::Converter).await?);
        }

        Ok(())
    }
}

fn print_tool(tool: &ResolvedTool) {
    println!(
        "{} {} ({}) {}",
        tool.name.bold(),
        tool.version.to_string().green(),
        utils::origin_label(tool.origin),
        tool.executable.to_string_lossy()
    );
}
