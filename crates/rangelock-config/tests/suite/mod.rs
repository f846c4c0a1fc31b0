mod loading;
mod sizes;
mod tracing_init;
