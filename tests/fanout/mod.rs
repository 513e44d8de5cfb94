mod agent;
mod continuous;
mod one_shot;
mod verification;
