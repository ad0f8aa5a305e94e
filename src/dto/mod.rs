pub mod automation_dto;
pub mod callback_dto;
pub mod cron_dto;
pub mod public_dto;
pub mod telegram_dto;
