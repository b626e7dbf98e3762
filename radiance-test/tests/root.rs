mod frame;
mod input;
mod queue;
mod resize;
mod scene;
mod settings;
