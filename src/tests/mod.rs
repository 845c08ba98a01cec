
mod app;
mod web;
