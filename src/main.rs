use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod bookmarks;
mod cli;
mod config;
mod search;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use bookmarks::{parse_categories, parse_tags, BookmarkCreate, BookmarkUpdate};
use cli::Command;
use config::Config;
use search::SearchQuery;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    let app = app::App::open(config)?;

    match args.command {
        Command::Serve {} => {
            runtime()?.block_on(web::serve(Arc::new(app)))?;
        }

        Command::Search {
            query,
            owner,
            mode,
            limit,
            threshold,
            json,
        } => {
            let defaults = &app.config().search;
            let query = SearchQuery::new(
                query,
                mode,
                limit.unwrap_or(defaults.default_limit),
                threshold.unwrap_or(defaults.default_threshold),
            )?;

            let orchestrator = app.orchestrator();
            let response = runtime()?.block_on(orchestrator.search(&query, &owner))?;

            if response.partial {
                log::warn!("one retriever failed, results are partial");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&response.hits)?);
            } else {
                for hit in &response.hits {
                    println!(
                        "{:>4}  {:.5}  {}",
                        hit.id,
                        hit.rrf_score,
                        hit.title.as_deref().unwrap_or(&hit.url)
                    );
                    if hit.title.is_some() {
                        println!("      {}", hit.url);
                    }
                    if !hit.matched_categories.is_empty() {
                        println!("      categories: {}", hit.matched_categories.join(", "));
                    }
                }
                println!("{} bookmarks found", response.hits.len());
            }
        }

        Command::Add {
            owner,
            url,
            title,
            description,
            summary,
            favicon_url,
            tags,
            categories,
        } => {
            let bmark = app.create(
                &owner,
                BookmarkCreate {
                    url,
                    title,
                    description,
                    summary,
                    favicon_url,
                    tags: tags.as_deref().map(parse_tags).unwrap_or_default(),
                    categories: categories
                        .as_deref()
                        .map(parse_categories)
                        .unwrap_or_default(),
                    created_at: None,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&bmark)?);
        }

        Command::Update {
            owner,
            id,
            url,
            title,
            description,
            summary,
            tags,
            categories,
        } => {
            let bmark = app.update(
                &owner,
                id,
                BookmarkUpdate {
                    url,
                    title,
                    description,
                    summary,
                    favicon_url: None,
                    tags: tags.as_deref().map(parse_tags),
                    categories: categories.as_deref().map(parse_categories),
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&bmark)?);
        }

        Command::Delete { owner, id } => {
            app.delete(&owner, id)?;
            println!("bookmark {id} deleted");
        }

        Command::Reindex {} => {
            let progress = ProgressBar::new(0);
            progress.set_style(
                ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                    .context("invalid progress template")?,
            );
            progress.set_message("embedding");

            let result = app.reconcile(&progress)?;
            progress.finish_and_clear();

            println!(
                "{} embedded, {} unchanged, {} removed, {} without text, {} failed",
                result.embedded, result.unchanged, result.removed, result.skipped, result.failed
            );
        }
    }

    Ok(())
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}
