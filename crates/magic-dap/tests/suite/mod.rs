mod launch;
mod pause;
