use clap::{Parser, Subcommand};

use crate::{create::Create, info::Info, render::Render};

mod create;
mod info;
mod render;

#[derive(Parser)]
struct Options {
	#[clap(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	Create(Create),
	Info(Info),
	Render(Render),
}

fn main() {
	env_logger::init();

	let opts: Options = Options::parse();
	match opts.command {
		Command::Create(create) => create::create(create),
		Command::Info(info) => info::info(info),
		Command::Render(render) => render::render(render),
	}
}
