mod pipeline;
mod scenarios;
mod setup;
