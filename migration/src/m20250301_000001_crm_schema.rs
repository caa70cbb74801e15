use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
pub(crate) enum Leads {
    Table,
    Id,
    DispensaryName,
    Address,
    City,
    State,
    Zip,
    ContactName,
    ManagerName,
    OwnerName,
    Phone,
    ContactEmail,
    Website,
    CurrentPosSystem,
    DealValue,
    Priority,
    Stage,
    CallbackDays,
    CallbackTimeSlots,
    CallbackTimeFrom,
    CallbackTimeTo,
    NextCallbackDate,
    CadenceStep,
    Notes,
    Source,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub(crate) enum EmailTemplates {
    Table,
    Id,
    Name,
    Subject,
    Body,
    Category,
    CadenceStep,
    DelayDays,
    IsDefault,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ContactHistory {
    Table,
    Id,
    LeadId,
    Method,
    Kind,
    Notes,
    Outcome,
    NextCallback,
    EmailTemplateId,
    EmailSubject,
    FromStage,
    ToStage,
    CadenceStep,
    ContactedAt,
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
    LeadId,
    Title,
    Description,
    DueDate,
    DueTime,
    Priority,
    Status,
    Source,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

fn timestamp_col(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Leads::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Leads::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Leads::DispensaryName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Leads::Address).string_len(255))
                    .col(ColumnDef::new(Leads::City).string_len(128))
                    .col(ColumnDef::new(Leads::State).string_len(64))
                    .col(ColumnDef::new(Leads::Zip).string_len(16))
                    .col(ColumnDef::new(Leads::ContactName).string_len(255))
                    .col(ColumnDef::new(Leads::ManagerName).string_len(255))
                    .col(ColumnDef::new(Leads::OwnerName).string_len(255))
                    .col(ColumnDef::new(Leads::Phone).string_len(64))
                    .col(ColumnDef::new(Leads::ContactEmail).string_len(320))
                    .col(ColumnDef::new(Leads::Website).string_len(512))
                    .col(ColumnDef::new(Leads::CurrentPosSystem).string_len(128))
                    .col(ColumnDef::new(Leads::DealValue).double())
                    .col(
                        ColumnDef::new(Leads::Priority)
                            .string_len(16)
                            .not_null()
                            .default("Medium"),
                    )
                    .col(
                        ColumnDef::new(Leads::Stage)
                            .string_len(32)
                            .not_null()
                            .default("New Lead"),
                    )
                    .col(ColumnDef::new(Leads::CallbackDays).string_len(64))
                    .col(ColumnDef::new(Leads::CallbackTimeSlots).string_len(128))
                    .col(ColumnDef::new(Leads::CallbackTimeFrom).string_len(8))
                    .col(ColumnDef::new(Leads::CallbackTimeTo).string_len(8))
                    .col(ColumnDef::new(Leads::NextCallbackDate).date())
                    .col(
                        ColumnDef::new(Leads::CadenceStep)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Leads::Notes).text())
                    .col(ColumnDef::new(Leads::Source).string_len(64))
                    .col(&mut timestamp_col(Leads::CreatedAt))
                    .col(&mut timestamp_col(Leads::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_leads_stage")
                    .table(Leads::Table)
                    .col(Leads::Stage)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_leads_dispensary_name")
                    .table(Leads::Table)
                    .col(Leads::DispensaryName)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailTemplates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailTemplates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EmailTemplates::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(EmailTemplates::Subject)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(EmailTemplates::Body).text().not_null())
                    .col(ColumnDef::new(EmailTemplates::Category).string_len(64))
                    .col(ColumnDef::new(EmailTemplates::CadenceStep).integer())
                    .col(
                        ColumnDef::new(EmailTemplates::DelayDays)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(EmailTemplates::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(&mut timestamp_col(EmailTemplates::CreatedAt))
                    .col(&mut timestamp_col(EmailTemplates::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ContactHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContactHistory::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ContactHistory::LeadId).integer().not_null())
                    .col(
                        ColumnDef::new(ContactHistory::Method)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContactHistory::Kind)
                            .string_len(32)
                            .not_null()
                            .default("contact"),
                    )
                    .col(ColumnDef::new(ContactHistory::Notes).text())
                    .col(ColumnDef::new(ContactHistory::Outcome).string_len(255))
                    .col(ColumnDef::new(ContactHistory::NextCallback).timestamp_with_time_zone())
                    .col(ColumnDef::new(ContactHistory::EmailTemplateId).integer())
                    .col(ColumnDef::new(ContactHistory::EmailSubject).string_len(255))
                    .col(ColumnDef::new(ContactHistory::FromStage).string_len(32))
                    .col(ColumnDef::new(ContactHistory::ToStage).string_len(32))
                    .col(ColumnDef::new(ContactHistory::CadenceStep).integer())
                    .col(&mut timestamp_col(ContactHistory::ContactedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contact_history_lead")
                            .from(ContactHistory::Table, ContactHistory::LeadId)
                            .to(Leads::Table, Leads::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contact_history_template")
                            .from(ContactHistory::Table, ContactHistory::EmailTemplateId)
                            .to(EmailTemplates::Table, EmailTemplates::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_contact_history_lead")
                    .table(ContactHistory::Table)
                    .col(ContactHistory::LeadId)
                    .col(ContactHistory::ContactedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tasks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tasks::LeadId).integer().not_null())
                    .col(ColumnDef::new(Tasks::Title).string_len(256).not_null())
                    .col(ColumnDef::new(Tasks::Description).text())
                    .col(ColumnDef::new(Tasks::DueDate).date())
                    .col(ColumnDef::new(Tasks::DueTime).string_len(8))
                    .col(
                        ColumnDef::new(Tasks::Priority)
                            .string_len(16)
                            .not_null()
                            .default("Medium"),
                    )
                    .col(
                        ColumnDef::new(Tasks::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Tasks::Source)
                            .string_len(32)
                            .not_null()
                            .default("manual"),
                    )
                    .col(ColumnDef::new(Tasks::CompletedAt).timestamp_with_time_zone())
                    .col(&mut timestamp_col(Tasks::CreatedAt))
                    .col(&mut timestamp_col(Tasks::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tasks_lead")
                            .from(Tasks::Table, Tasks::LeadId)
                            .to(Leads::Table, Leads::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tasks_lead_status")
                    .table(Tasks::Table)
                    .col(Tasks::LeadId)
                    .col(Tasks::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tasks::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(ContactHistory::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(EmailTemplates::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Leads::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
