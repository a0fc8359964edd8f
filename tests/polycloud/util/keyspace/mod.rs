mod concurrency;
mod paths;
